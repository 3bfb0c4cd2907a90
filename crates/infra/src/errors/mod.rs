//! Error conversions for infrastructure adapters

pub mod conversions;

pub use conversions::{map_join_error, InfraError};
