use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use connexa_core::transport::{Transport, WireRequest, WireResponse};
use connexa_domain::constants::IDEMPOTENCY_HEADER;
use connexa_domain::{ConnexaError, HttpMethod, Result};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::auth::AccessTokenProvider;
use crate::errors::InfraError;

/// reqwest-backed [`Transport`] for the Cloud Connexa REST API.
///
/// Every call carries a bearer token from the configured
/// [`AccessTokenProvider`] and, when present, the request's idempotency key.
/// Error statuses are returned as responses; only failures to get any
/// response become errors.
#[derive(Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    base_url: Url,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl HttpTransport {
    /// Start building a transport for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, request: &WireRequest) -> Result<Url> {
        let root = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{root}{}", request.path))
            .map_err(|err| ConnexaError::Configuration(format!("invalid request URL for {}: {err}", request.path)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse> {
        let url = self.url_for(request)?;
        let token = self.tokens.access_token().await?;

        let mut builder = self
            .client
            .request(method_of(request.method), url.clone())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json");
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        debug!(method = request.method.as_str(), %url, "sending HTTP request");
        let response = builder.send().await.map_err(|err| ConnexaError::from(InfraError::from(err)))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let bytes = response.bytes().await.map_err(|err| ConnexaError::from(InfraError::from(err)))?;
        debug!(method = request.method.as_str(), %url, status, "received HTTP response");

        Ok(WireResponse { status, body: parse_body(&bytes), retry_after })
    }
}

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    raw.parse::<u64>()
        .ok()
        .map(Duration::from_secs)
        .or_else(|| raw.parse::<f64>().ok().and_then(|secs| Duration::try_from_secs_f64(secs).ok()))
}

/// Empty bodies become `Null`; non-JSON bodies are kept as a string so error
/// messages from proxies still reach the caller
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Builder for [`HttpTransport`].
pub struct HttpTransportBuilder {
    base_url: String,
    timeout: Duration,
    connect_timeout: Duration,
    user_agent: Option<String>,
    tokens: Option<Arc<dyn AccessTokenProvider>>,
}

impl HttpTransportBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: None,
            tokens: None,
        }
    }

    /// Upper bound for a whole request; per-request timeouts may shorten it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|err| ConnexaError::Configuration(format!("invalid base URL '{}': {err}", self.base_url)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConnexaError::Configuration(format!("unsupported URL scheme '{}'", base_url.scheme())));
        }
        let tokens = self
            .tokens
            .ok_or_else(|| ConnexaError::Configuration("an access token provider is required".into()))?;

        let mut builder = ReqwestClient::builder().timeout(self.timeout).connect_timeout(self.connect_timeout);
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(|err| ConnexaError::from(InfraError::from(err)))?;

        Ok(HttpTransport { client, base_url, tokens })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use connexa_domain::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::StaticToken;
    use reqwest::header::HeaderValue;

    fn transport_for(base: &str) -> HttpTransport {
        HttpTransport::builder(base)
            .timeout(Duration::from_secs(5))
            .token_provider(Arc::new(StaticToken::new("test-token")))
            .build()
            .expect("transport")
    }

    #[tokio::test]
    async fn sends_auth_idempotency_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1.0/networks"))
            .and(query_param("page", "2"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Idempotency-Key", "key-1"))
            .and(body_json(json!({"name": "office"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "net_1", "name": "office"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = WireRequest::new(HttpMethod::Post, "/api/v1.1.0/networks");
        request.query.insert("page".into(), "2".into());
        request.body = Some(json!({"name": "office"}));
        request.idempotency_key = Some("key-1".into());

        let response = transport_for(&server.uri()).send(&request).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body["id"], "net_1");
    }

    #[tokio::test]
    async fn error_statuses_are_responses_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "7")
                    .set_body_json(json!({"error": {"message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let response = transport_for(&server.uri()).send(&WireRequest::get("/api/v1.1.0/networks")).await.unwrap();
        assert_eq!(response.status, 429);
        assert_eq!(response.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(response.body["error"]["message"], "slow down");
    }

    #[tokio::test]
    async fn empty_and_plain_text_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(204)).mount(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let transport = transport_for(&server.uri());
        let deleted = transport.send(&WireRequest::new(HttpMethod::Delete, "/api/v1.1.0/networks/n")).await.unwrap();
        assert_eq!(deleted.body, Value::Null);

        let gateway = transport.send(&WireRequest::get("/api/v1.1.0/networks")).await.unwrap();
        assert_eq!(gateway.body, Value::String("Bad Gateway".into()));
    }

    #[tokio::test]
    async fn per_request_timeout_is_a_timeout_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let request = WireRequest::get("/api/v1.1.0/networks").with_timeout(Duration::from_millis(50));
        let error = transport_for(&server.uri()).send(&request).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = transport_for(&format!("http://{addr}")).send(&WireRequest::get("/api/v1.0/networks")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Network);
    }

    #[test]
    fn builder_rejects_bad_urls_and_missing_tokens() {
        let bad_scheme = HttpTransport::builder("ftp://example.com")
            .token_provider(Arc::new(StaticToken::new("t")))
            .build();
        assert!(matches!(bad_scheme, Err(ConnexaError::Configuration(_))));

        let no_tokens = HttpTransport::builder("https://acme.api.openvpn.com").build();
        assert!(matches!(no_tokens, Err(ConnexaError::Configuration(_))));
    }

    #[test]
    fn retry_after_header_out_of_range_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e30"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(2500)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("18446744073709551615"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(u64::MAX)));
    }
}
