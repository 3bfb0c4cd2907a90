//! Configuration loader
//!
//! Builds a [`ConnexaConfig`] from an optional file with environment
//! variables layered on top, then validates the result.
//!
//! ## Loading Strategy
//! 1. Start from defaults
//! 2. If `CONNEXA_CONFIG` names a file, load it (JSON or TOML by extension)
//! 3. Apply environment overrides
//! 4. Validate (including URL syntax of `api.base_url`)
//!
//! ## Environment Variables
//! - `CONNEXA_CONFIG`: Path to a `.json` or `.toml` config file
//! - `CONNEXA_API_URL`: Base URL of the API
//! - `CONNEXA_API_VERSION` (alias `CLOUDCONNEXA_API_VERSION`): Pin `1.0` or `1.1.0`
//! - `CONNEXA_REQUEST_TIMEOUT`: Per-request timeout in seconds
//! - `CONNEXA_MAX_RETRIES`: Retries after the first attempt
//! - `CONNEXA_FAILURE_THRESHOLD`: Failures that open the circuit
//! - `CONNEXA_RATE_LIMIT_ENABLED`: Whether the client-side limiter runs (true/false)
//! - `CONNEXA_RATE_LIMIT`: Calls per window
//! - `CONNEXA_RATE_LIMIT_STORE`: Shared counter database for cross-process limits
//! - `CONNEXA_OFFLINE_ENABLED`: Whether offline fallback runs (true/false)
//! - `CONNEXA_OFFLINE_STORE`: Offline database path
//! - `CONNEXA_CONFLICT_STRATEGY`: `server_wins`, `client_wins`, `merge` or `manual`
//! - `CONNEXA_HEALTH_INTERVAL`: Health probe interval in seconds

use std::path::{Path, PathBuf};
use std::str::FromStr;

use connexa_domain::constants::API_VERSION_ENV;
use connexa_domain::{ConflictStrategy, ConnexaConfig, ConnexaError, Result};
use url::Url;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CONNEXA_CONFIG";

/// Load configuration from `CONNEXA_CONFIG` (if set) and the environment.
///
/// # Errors
/// Returns `ConnexaError::Configuration` if the file cannot be read or
/// parsed, an override has an invalid value, or the result fails validation.
pub fn load() -> Result<ConnexaConfig> {
    let base = match std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.trim().is_empty()) {
        Some(path) => read_file(Path::new(&path))?,
        None => ConnexaConfig::default(),
    };
    let config = apply_overrides(base, |key| std::env::var(key).ok())?;
    validate(&config)?;
    tracing::info!(base_url = %config.api.base_url, "Configuration loaded");
    Ok(config)
}

/// Load configuration from a file, with environment overrides applied.
///
/// # Errors
/// Returns `ConnexaError::Configuration` if the file is missing or invalid,
/// or the merged configuration fails validation.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ConnexaConfig> {
    let config = apply_overrides(read_file(path.as_ref())?, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply overrides looked up through `lookup` on top of `config`.
///
/// Empty values count as unset.
pub fn apply_overrides<F>(mut config: ConnexaConfig, lookup: F) -> Result<ConnexaConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = get("CONNEXA_API_URL") {
        config.api.base_url = url;
    }
    if let Some(version) = get("CONNEXA_API_VERSION").or_else(|| get(API_VERSION_ENV)) {
        config.api.api_version = Some(version);
    }
    if let Some(secs) = get("CONNEXA_REQUEST_TIMEOUT") {
        config.api.request_timeout_secs = parse_value("CONNEXA_REQUEST_TIMEOUT", &secs)?;
    }
    if let Some(retries) = get("CONNEXA_MAX_RETRIES") {
        config.retry.max_retries = parse_value("CONNEXA_MAX_RETRIES", &retries)?;
    }
    if let Some(threshold) = get("CONNEXA_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold = parse_value("CONNEXA_FAILURE_THRESHOLD", &threshold)?;
    }
    if let Some(enabled) = get("CONNEXA_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = parse_bool(&enabled);
    }
    if let Some(limit) = get("CONNEXA_RATE_LIMIT") {
        config.rate_limit.limit = parse_value("CONNEXA_RATE_LIMIT", &limit)?;
    }
    if let Some(path) = get("CONNEXA_RATE_LIMIT_STORE") {
        config.rate_limit.shared_store_path = Some(PathBuf::from(path));
    }
    if let Some(enabled) = get("CONNEXA_OFFLINE_ENABLED") {
        config.offline.enabled = parse_bool(&enabled);
    }
    if let Some(path) = get("CONNEXA_OFFLINE_STORE") {
        config.offline.store_path = PathBuf::from(path);
    }
    if let Some(strategy) = get("CONNEXA_CONFLICT_STRATEGY") {
        config.offline.conflict_strategy = ConflictStrategy::from_str(&strategy)?;
    }
    if let Some(secs) = get("CONNEXA_HEALTH_INTERVAL") {
        config.health.interval_secs = parse_value("CONNEXA_HEALTH_INTERVAL", &secs)?;
    }

    Ok(config)
}

/// Validate a configuration, including the base URL syntax.
///
/// # Errors
/// Returns `ConnexaError::Configuration` describing the first problem found.
pub fn validate(config: &ConnexaConfig) -> Result<()> {
    config.validate()?;
    let url = Url::parse(&config.api.base_url)
        .map_err(|e| ConnexaError::Configuration(format!("Invalid api.base_url '{}': {e}", config.api.base_url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnexaError::Configuration(format!(
            "api.base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<ConnexaConfig> {
    if !path.exists() {
        return Err(ConnexaError::Configuration(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConnexaError::Configuration(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration text; the format follows the file extension.
fn parse_config(contents: &str, path: &Path) -> Result<ConnexaConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConnexaError::Configuration(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConnexaError::Configuration(format!("Invalid JSON format: {e}"))),
        _ => Err(ConnexaError::Configuration(format!("Unsupported config format: {extension}"))),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConnexaError::Configuration(format!("Invalid {key} '{raw}': {e}")))
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    use connexa_domain::RateLimitScope;
    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn temp_config(contents: &str, extension: &str) -> (NamedTempFile, PathBuf) {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).unwrap();
        (temp_file, path)
    }

    #[test]
    fn test_parse_bool() {
        for raw in ["1", "true", "YES", "on"] {
            assert!(parse_bool(raw), "{raw} should be true");
        }
        for raw in ["0", "false", "no", "off", "maybe"] {
            assert!(!parse_bool(raw), "{raw} should be false");
        }
    }

    #[test]
    fn test_overrides_apply_on_top_of_file_values() {
        let env = vars(&[
            ("CONNEXA_API_URL", "https://acme.api.openvpn.com"),
            ("CONNEXA_MAX_RETRIES", "7"),
            ("CONNEXA_OFFLINE_STORE", "/var/lib/connexa/offline.db"),
            ("CONNEXA_CONFLICT_STRATEGY", "client-wins"),
            ("CONNEXA_RATE_LIMIT_ENABLED", "off"),
            ("CONNEXA_HEALTH_INTERVAL", "5"),
        ]);

        let config = apply_overrides(ConnexaConfig::default(), |key| env.get(key).cloned()).unwrap();
        assert_eq!(config.api.base_url, "https://acme.api.openvpn.com");
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.offline.store_path, PathBuf::from("/var/lib/connexa/offline.db"));
        assert_eq!(config.offline.conflict_strategy, ConflictStrategy::ClientWins);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.health.interval_secs, 5);
        // untouched values keep their defaults
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_version_alias_and_precedence() {
        let alias_only = vars(&[(API_VERSION_ENV, "1.0")]);
        let config = apply_overrides(ConnexaConfig::default(), |key| alias_only.get(key).cloned()).unwrap();
        assert_eq!(config.api.api_version.as_deref(), Some("1.0"));

        let both = vars(&[(API_VERSION_ENV, "1.0"), ("CONNEXA_API_VERSION", "1.1.0")]);
        let config = apply_overrides(ConnexaConfig::default(), |key| both.get(key).cloned()).unwrap();
        assert_eq!(config.api.api_version.as_deref(), Some("1.1.0"));
    }

    #[test]
    fn test_invalid_override_values() {
        let env = vars(&[("CONNEXA_MAX_RETRIES", "lots")]);
        let err = apply_overrides(ConnexaConfig::default(), |key| env.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConnexaError::Configuration(_)));

        let env = vars(&[("CONNEXA_CONFLICT_STRATEGY", "coin_flip")]);
        let err = apply_overrides(ConnexaConfig::default(), |key| env.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConnexaError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(validate(&ConnexaConfig::default()).is_err(), "missing base_url");
        assert!(validate(&ConnexaConfig::for_base_url("not a url")).is_err());
        assert!(validate(&ConnexaConfig::for_base_url("ftp://acme.example.com")).is_err());
        assert!(validate(&ConnexaConfig::for_base_url("https://acme.api.openvpn.com")).is_ok());
    }

    #[test]
    fn test_load_from_file_toml() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        let (_temp, path) = temp_config(
            r#"
[api]
base_url = "https://acme.api.openvpn.com"
api_version = "1.0"

[rate_limit]
limit = 20
scope = "endpoint"

[offline]
conflict_strategy = "merge"
"#,
            "toml",
        );

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.api.api_version.as_deref(), Some("1.0"));
        assert_eq!(config.rate_limit.limit, 20);
        assert_eq!(config.rate_limit.scope, RateLimitScope::Endpoint);
        assert_eq!(config.offline.conflict_strategy, ConflictStrategy::Merge);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_json_and_errors() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        let (_temp, path) = temp_config(r#"{"api": {"base_url": "http://localhost:8080"}}"#, "json");
        assert_eq!(load_from_file(&path).unwrap().api.base_url, "http://localhost:8080");
        std::fs::remove_file(path).ok();

        let (_temp, bad) = temp_config(r#"{ "api": "#, "json");
        assert!(matches!(load_from_file(&bad), Err(ConnexaError::Configuration(_))));
        std::fs::remove_file(bad).ok();

        let missing = load_from_file("/nonexistent/connexa.toml");
        assert!(matches!(missing, Err(ConnexaError::Configuration(_))));

        let unsupported = parse_config("api: {}", Path::new("connexa.yaml"));
        assert!(matches!(unsupported, Err(ConnexaError::Configuration(_))));
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        let (_temp, path) = temp_config("[retry]\nmax_retries = 1\n", "toml");

        std::env::set_var(CONFIG_PATH_ENV, &path);
        std::env::set_var("CONNEXA_API_URL", "https://acme.api.openvpn.com");
        let loaded = load();
        std::env::remove_var(CONFIG_PATH_ENV);
        std::env::remove_var("CONNEXA_API_URL");

        let config = loaded.unwrap();
        assert_eq!(config.api.base_url, "https://acme.api.openvpn.com");
        assert_eq!(config.retry.max_retries, 1);

        std::fs::remove_file(path).ok();
    }
}
