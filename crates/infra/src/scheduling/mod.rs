//! Background tasks

pub mod error;
pub mod health_monitor;

pub use error::{SchedulerError, SchedulerResult};
pub use health_monitor::{HealthMonitor, HealthMonitorConfig};
