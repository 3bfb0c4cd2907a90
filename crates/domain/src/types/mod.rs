//! Domain types and models

pub mod offline;
pub mod request;
pub mod response;
pub mod version;

pub use offline::{CacheEntry, ConflictRecord, ConflictStrategy, OperationStatus, QueuedOperation, SyncReport};
pub use request::{ApiRequest, HttpMethod, ResourceOp};
pub use response::{ApiResponse, Attempt, AttemptOutcome, ExecuteOutcome, ResponseSource};
pub use version::{ApiVersion, Feature, VersionContext, VersionSource};
