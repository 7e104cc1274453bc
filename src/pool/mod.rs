//! Pool Module
//!
//! Pool values, their build strategies, patching, and the in-memory registry.

pub mod lifecycle;
pub mod patch;
pub mod raid;
pub mod registry;
pub mod status;

pub use lifecycle::*;
pub use patch::*;
pub use raid::*;
pub use registry::*;
pub use status::*;
