//! # Connexa Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The reqwest HTTP transport with bearer token injection
//! - SQLite offline store and shared rate limit counters (r2d2 pool)
//! - The background health monitor
//! - Configuration loading and tracing setup
//! - [`ClientFactory`], which wires all of the above into a client
//!
//! ## Architecture
//! - Implements traits defined in `connexa-core` and `connexa-common`
//! - Contains all "impure" code (network, files)

pub mod config;
pub mod database;
pub mod errors;
pub mod factory;
pub mod http;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use database::{DbManager, DbManagerConfig, SqliteCounterStore, SqliteOfflineStore};
pub use errors::InfraError;
pub use factory::{ClientBundle, ClientFactory};
pub use http::{AccessTokenProvider, HttpTransport, StaticToken};
pub use observability::{init_tracing, LogFormat};
pub use scheduling::{HealthMonitor, HealthMonitorConfig};
