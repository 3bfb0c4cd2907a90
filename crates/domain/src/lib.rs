//! # Connexa Domain
//!
//! Data model for the resilient Cloud Connexa client runtime.
//!
//! This crate contains:
//! - Request/response model and execution outcomes
//! - Offline cache entries, queued operations and conflict records
//! - Protocol versions and the feature matrix
//! - Error kinds and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other Connexa crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
