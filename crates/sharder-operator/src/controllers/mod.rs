//! Reconcilers
//!
//! `fleet` converges single Deployments and Services; `sharded` maps a
//! `Sharded` resource onto the four objects it owns and drives the polling
//! loop.

mod context;
pub mod fleet;
mod sharded;

pub use context::Context;
pub use sharded::{reconcile, reconcile_all, ReconcileError, ShardedController, TickReport};
