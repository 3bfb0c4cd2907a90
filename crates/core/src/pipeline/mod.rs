//! Request pipeline, retry classification and the client facade

pub mod client;
pub mod retry_policy;
pub mod service;

pub use client::ResilientClient;
pub use retry_policy::ApiRetryPolicy;
pub use service::{PipelineSettings, RequestPipeline, RequestPipelineBuilder, MAX_SERVER_BLOCK};
