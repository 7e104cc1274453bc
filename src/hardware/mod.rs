//! Hardware Module
//!
//! Drive discovery, identity derivation and the adoption ledger.

pub mod discovery;
pub mod registry;

pub use discovery::*;
pub use registry::*;
