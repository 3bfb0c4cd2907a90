//! Offline cache and write queue: storage port and key derivation

pub mod cache_key;
pub mod ports;

pub use cache_key::{derive_cache_key, invalidation_prefixes, item_cache_key};
pub use ports::OfflineStore;
