//! Domain layer - Core types and port definitions
//!
//! This module defines the drive model and the traits (ports) that host
//! adapters implement, following hexagonal architecture principles.

pub mod drive;
pub mod ports;

pub use drive::*;
pub use ports::*;
