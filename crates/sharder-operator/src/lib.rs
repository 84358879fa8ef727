//! Sharder Operator
//!
//! Turns each declared `Sharded` resource into two fleets: a router fleet
//! running `sharder-server` behind the public service, and a delegate fleet
//! running the user's image behind the service the routers discover.

pub mod admin;
pub mod controllers;
pub mod metrics;
