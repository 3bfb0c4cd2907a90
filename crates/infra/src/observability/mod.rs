//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; binaries and tests call
//! [`init_tracing`] once to decide where they go.

use std::str::FromStr;

use connexa_domain::{ConnexaError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable, e.g. `connexa_core=debug`
pub const LOG_FILTER_ENV: &str = "CONNEXA_LOG";

/// Output format, read from this variable by [`init_tracing_from_env`]
pub const LOG_FORMAT_ENV: &str = "CONNEXA_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConnexaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConnexaError::Configuration(format!("unknown log format '{other}'"))),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `ConnexaError::Configuration` if a global subscriber is already
/// installed.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| ConnexaError::Configuration(format!("tracing already initialised: {e}")))
}

/// [`init_tracing`] with the format taken from `CONNEXA_LOG_FORMAT`.
pub fn init_tracing_from_env() -> Result<()> {
    let format = std::env::var(LOG_FORMAT_ENV).ok().map(|raw| raw.parse()).transpose()?.unwrap_or_default();
    init_tracing(format)
}
