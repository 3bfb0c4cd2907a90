//! Transport port and HTTP response classification

pub mod classify;
pub mod ports;

pub use classify::{error_from_response, into_result};
pub use ports::{Transport, WireRequest, WireResponse};
