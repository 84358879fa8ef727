//! Custom Resource Definitions
//!
//! The declared desired state for a sharded service.

pub mod sharded;

pub use sharded::{Sharded, ShardedSpec, SpecValidationError};
