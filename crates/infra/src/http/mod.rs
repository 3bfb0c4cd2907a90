//! HTTP transport for the remote API

pub mod auth;
pub mod transport;

pub use auth::{AccessTokenProvider, StaticToken};
pub use transport::{HttpTransport, HttpTransportBuilder};
