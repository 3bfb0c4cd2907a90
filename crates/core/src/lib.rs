//! # Connexa Core
//!
//! Resilient request pipeline - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces for the wire transport and the offline store
//! - Version detection and request/response adaptation
//! - The request pipeline (rate limit, circuit breaker, retry, fallback)
//! - Offline queue replay with conflict resolution
//!
//! ## Architecture Principles
//! - Depends on `connexa-common` and `connexa-domain` only
//! - No database or HTTP code
//! - All external effects via traits

pub mod offline;
pub mod pipeline;
pub mod sync;
pub mod transport;
pub mod version;

pub use offline::{derive_cache_key, invalidation_prefixes, item_cache_key, OfflineStore};
pub use pipeline::{ApiRetryPolicy, PipelineSettings, RequestPipeline, RequestPipelineBuilder, ResilientClient};
pub use sync::{Resolution, SyncManager};
pub use transport::{Transport, WireRequest, WireResponse};
pub use version::{normalize_list, CallPlan, DtoConverter, FieldRule, VersionAdapter};
