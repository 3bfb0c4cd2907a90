//! Configuration loading
//!
//! Reads a [`connexa_domain::ConnexaConfig`] from an optional JSON or TOML
//! file and environment overrides.

pub mod loader;

pub use loader::{apply_overrides, load, load_from_file, validate, CONFIG_PATH_ENV};
