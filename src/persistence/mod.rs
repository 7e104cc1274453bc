//! Persistence Module
//!
//! Durable pool and adoption records behind the [`StateStore`] port.
//!
//! [`StateStore`]: crate::domain::ports::StateStore

pub mod sled_store;

pub use sled_store::*;
