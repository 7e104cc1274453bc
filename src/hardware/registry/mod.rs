//! Adoption Registry Module
//!
//! Tracks which scanned drives have been claimed, and which claimed drives
//! are still free for pool creation.

pub mod ledger;

pub use ledger::*;
