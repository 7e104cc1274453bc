//! API Module
//!
//! REST API for drive adoption and pool management.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
