//! SQLite persistence: pooled connections, the offline store and shared
//! rate limit counters

pub mod counter_store;
pub mod manager;
pub mod offline_store;

pub use counter_store::SqliteCounterStore;
pub use manager::{DbConnection, DbManager, DbManagerConfig};
pub use offline_store::SqliteOfflineStore;
