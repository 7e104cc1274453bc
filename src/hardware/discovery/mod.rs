//! Drive Discovery Module
//!
//! Discovers block devices on Linux systems, derives their stable keys and
//! filters the resulting snapshots.

pub mod filter;
pub mod identity;
pub mod scanner;

pub use filter::*;
pub use identity::*;
pub use scanner::*;
