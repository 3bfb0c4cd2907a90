//! Offline queue replay and conflict reconciliation

pub mod conflict;
pub mod manager;

pub use conflict::{detect_conflict, merge_fields, resolve, Resolution};
pub use manager::SyncManager;
