//! Sharder Server Library
//!
//! A reverse proxy that routes each request to one backend of a fleet,
//! chosen by consistent hashing of a key taken from the request path.

pub mod api;
pub mod config;
pub mod discovery;
pub mod metrics;
pub mod router;
pub mod sharding;
pub mod version;
