//! Mapping of non-2xx responses to error kinds
//!
//! Error bodies come in a few shapes:
//!
//! - `{"error": {"message": "...", "retry_after": 30, "details": {...}}}`
//! - `{"error": "...", "code": "...", "detail": "..."}`
//! - `{"message": "..."}`
//!
//! The `Retry-After` header wins over a `retry_after` body field.

use std::time::Duration;

use connexa_domain::{ConnexaError, Result};
use serde_json::Value;

use super::ports::WireResponse;

/// Pass 2xx responses through and turn everything else into an error
pub fn into_result(response: WireResponse) -> Result<WireResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(error_from_response(&response))
    }
}

/// Build the error for a non-2xx response
pub fn error_from_response(response: &WireResponse) -> ConnexaError {
    let (message, body_retry_after, details) = parse_error_body(&response.body);
    let message = message.unwrap_or_else(|| format!("HTTP {}", response.status));
    ConnexaError::from_status(response.status, message, response.retry_after.or(body_retry_after), details)
}

fn parse_error_body(body: &Value) -> (Option<String>, Option<Duration>, Option<Value>) {
    match body.get("error") {
        Some(Value::Object(error)) => (
            error.get("message").and_then(Value::as_str).map(str::to_string),
            error.get("retry_after").and_then(seconds),
            error.get("details").cloned(),
        ),
        Some(Value::String(message)) => {
            let detail = body.get("detail").and_then(Value::as_str);
            let message = match detail {
                Some(detail) => format!("{message}: {detail}"),
                None => message.clone(),
            };
            (Some(message), body.get("retry_after").and_then(seconds), body.get("code").cloned())
        }
        _ => (
            body.get("message").and_then(Value::as_str).map(str::to_string),
            body.get("retry_after").and_then(seconds),
            None,
        ),
    }
}

fn seconds(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_f64().and_then(|s| Duration::try_from_secs_f64(s).ok()),
        Value::String(s) => s.trim().parse::<u64>().ok().map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use connexa_domain::ErrorKind;
    use serde_json::json;

    use super::*;

    /// Validates `error_from_response` behavior for the nested error envelope
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the message and body retry hint are extracted.
    #[test]
    fn test_nested_error_envelope() {
        let response = WireResponse::new(
            429,
            json!({"error": {"message": "Too many requests", "retry_after": 7}}),
        );
        let error = error_from_response(&response);

        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert!(error.to_string().contains("Too many requests"));
    }

    /// Validates `error_from_response` behavior for the header precedence
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the `Retry-After` header beats the body hint.
    #[test]
    fn test_retry_after_header_wins() {
        let mut response = WireResponse::new(429, json!({"error": "rate_limited", "retry_after": 60}));
        response.retry_after = Some(Duration::from_secs(2));

        assert_eq!(error_from_response(&response).retry_after(), Some(Duration::from_secs(2)));
    }

    /// Validates `into_result` behavior for the flat error shape scenario.
    ///
    /// Assertions:
    /// - Confirms `{error, code, detail}` bodies map to validation errors.
    /// - Confirms 2xx responses pass through untouched.
    #[test]
    fn test_flat_error_and_success_passthrough() {
        let response = WireResponse::new(
            400,
            json!({"error": "invalid_name", "code": "E_NAME", "detail": "name is required"}),
        );
        let error = into_result(response).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(error.to_string().contains("name is required"));

        let ok = WireResponse::new(204, Value::Null);
        assert_eq!(into_result(ok.clone()).unwrap(), ok);
    }

    /// Validates `error_from_response` behavior for out-of-range body hints.
    ///
    /// Assertions:
    /// - Confirms hints too large for a `Duration` are dropped, not fatal.
    /// - Confirms negative hints are dropped.
    #[test]
    fn test_out_of_range_retry_after_is_ignored() {
        let huge = WireResponse::new(429, json!({"error": {"message": "slow down", "retry_after": 1e30}}));
        let error = error_from_response(&huge);
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.retry_after(), None);

        let negative = WireResponse::new(429, json!({"error": "rate_limited", "retry_after": -5}));
        assert_eq!(error_from_response(&negative).retry_after(), None);
    }
}
