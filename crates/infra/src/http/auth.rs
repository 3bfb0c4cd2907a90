//! Access token injection for the HTTP transport

use async_trait::async_trait;
use connexa_domain::{ConnexaError, Result};

/// Trait for providing access tokens
///
/// Obtaining and refreshing OAuth credentials is the provider's business;
/// the transport only asks for a currently valid bearer token per attempt.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Get a valid access token
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, e.g. read from the environment at startup
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(ConnexaError::Authentication { status: None, message: "no access token configured".into() });
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use connexa_domain::ErrorKind;

    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_and_redacted() {
        let provider = StaticToken::new("secret-token");
        assert_eq!(provider.access_token().await.unwrap(), "secret-token");
        assert!(!format!("{provider:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn empty_token_is_an_authentication_error() {
        let error = StaticToken::new("  ").access_token().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Authentication);
    }
}
