//! Control Plane Module
//!
//! The orchestrator coordinating drives, pools and persisted state, and the
//! REST API in front of it.

pub mod orchestrator;
pub mod api;

pub use orchestrator::*;
pub use api::*;
