//! Resilient HTTP client for one external price service.
//!
//! Composes, in order: rate limiter -> circuit breaker permit -> retried
//! request -> per-attempt error classification. The rate-limit slot is
//! acquired before the breaker permit so a blocked call never consumes a
//! breaker attempt, and the breaker wraps the whole retried operation as
//! one logical call: internal retries count as a single success or
//! failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry};
use crate::errors::classify::{classify_status, classify_transport, parse_retry_after};
use crate::errors::{ErrorKind, SourceError};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;

/// How requests to a service are authenticated.
#[derive(Clone, Debug)]
pub enum AuthScheme {
    /// No authentication.
    None,
    /// Static bearer token.
    Bearer(String),
    /// API key sent in a named header.
    ApiKeyHeader { header: String, key: String },
    /// OAuth2 client-credentials grant; tokens are fetched lazily and
    /// cached until shortly before expiry.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
    },
}

/// Configuration for one service's resilient client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service key, used for logging, the rate limiter, and the breaker.
    pub service: String,
    /// API base URL.
    pub base_url: String,
    /// Authentication scheme.
    pub auth: AuthScheme,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Rate limit quotas.
    pub rate_limit: RateLimitConfig,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Circuit breaker configuration.
    pub breaker: BreakerConfig,
}

impl ClientConfig {
    /// Configuration with default resilience settings.
    pub fn new(service: impl Into<String>, base_url: impl Into<String>, auth: AuthScheme) -> Self {
        Self {
            service: service.into(),
            base_url: base_url.into(),
            auth,
            timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Margin subtracted from token lifetimes so a token is refreshed before
/// it expires mid-request.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("cardtrack/", env!("CARGO_PKG_VERSION"));

/// HTTP client for one external service with rate limiting, circuit
/// breaking, and taxonomy-aware retry built in.
pub struct ResilientClient {
    service: String,
    base_url: String,
    auth: AuthScheme,
    http: Client,
    limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl ResilientClient {
    /// Build a client, registering its breaker in the shared registry.
    pub fn new(config: ClientConfig, registry: &CircuitBreakerRegistry) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let breaker = registry.get_or_create(&config.service, config.breaker);
        let limiter = RateLimiter::new(config.service.clone(), config.rate_limit);

        Self {
            service: config.service,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth,
            http,
            limiter,
            breaker,
            retry: config.retry,
            token: Mutex::new(None),
        }
    }

    /// Service key this client talks to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current breaker state for health reporting.
    pub fn health_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// GET a JSON document.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, SourceError> {
        self.request_json(Method::GET, path, query, None).await
    }

    /// POST a JSON body and return the JSON response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, SourceError> {
        self.request_json(Method::POST, path, &[], Some(body)).await
    }

    /// Issue one logical request: rate-limit slot, breaker permit, then
    /// the retried, classified HTTP exchange.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, SourceError> {
        self.limiter.acquire().await;

        if !self.breaker.is_allowed() {
            debug!("Circuit open for '{}', rejecting {} {}", self.service, method, path);
            return Err(SourceError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let result = self
            .retry
            .run(&self.service, |_| {
                self.send_once(method.clone(), path, query, body)
            })
            .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.trips_breaker() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    fn api_error(&self, kind: ErrorKind, status: Option<u16>, message: String) -> SourceError {
        SourceError::Api {
            service: self.service.clone(),
            kind,
            status,
            message,
        }
    }

    /// One attempt: resolve auth, send, classify.
    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, SourceError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .http
            .request(method, &url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json");

        for (key, value) in query {
            request = request.query(&[(key, value.as_str())]);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request = match &self.auth {
            AuthScheme::None => request,
            AuthScheme::Bearer(token) => request.bearer_auth(token),
            AuthScheme::ApiKeyHeader { header, key } => request.header(header.as_str(), key),
            AuthScheme::ClientCredentials { .. } => {
                request.bearer_auth(self.bearer_token().await?)
            }
        };

        debug!("Sending request to '{}': {}", self.service, url);

        let response = request
            .send()
            .await
            .map_err(|e| self.api_error(classify_transport(&e), None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| {
                // A 2xx with an unreadable body: retry is the safe default.
                self.api_error(
                    ErrorKind::Transient,
                    Some(status.as_u16()),
                    format!("invalid response body: {e}"),
                )
            });
        }

        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
        } else {
            None
        };

        let message = match response.json::<Value>().await {
            Ok(data) => data
                .get("message")
                .or_else(|| data.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            Err(_) => format!("HTTP {}", status.as_u16()),
        };

        Err(self.api_error(
            classify_status(status.as_u16(), retry_after),
            Some(status.as_u16()),
            message,
        ))
    }

    /// Access token for client-credentials auth, cached until near expiry.
    async fn bearer_token(&self) -> Result<String, SourceError> {
        let AuthScheme::ClientCredentials {
            token_url,
            client_id,
            client_secret,
        } = &self.auth
        else {
            return Err(self.api_error(
                ErrorKind::Authentication,
                None,
                "client-credentials auth not configured".to_string(),
            ));
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Fetching client-credentials token for '{}'", self.service);
        let response = self
            .http
            .post(token_url)
            .header("User-Agent", USER_AGENT)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.api_error(classify_transport(&e), None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.api_error(
                ErrorKind::Authentication,
                Some(status.as_u16()),
                format!("token request failed: HTTP {}", status.as_u16()),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            self.api_error(
                ErrorKind::Authentication,
                Some(status.as_u16()),
                format!("invalid token response: {e}"),
            )
        })?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let entry = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        };
        *cached = Some(entry);
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::breaker::CircuitState;

    fn fast_config(service: &str, base_url: &str, auth: AuthScheme) -> ClientConfig {
        let mut config = ClientConfig::new(service, base_url, auth);
        config.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        };
        config
    }

    #[tokio::test]
    async fn test_success_returns_json_and_records_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let client = ResilientClient::new(
            fast_config("svc", &server.uri(), AuthScheme::None),
            &registry,
        );

        let body = client.get_json("/cards", &[]).await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(client.health_snapshot().state, CircuitState::Closed);
        assert_eq!(client.health_snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_api_key_header_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let client = ResilientClient::new(
            fast_config(
                "svc",
                &server.uri(),
                AuthScheme::ApiKeyHeader {
                    header: "X-API-Key".to_string(),
                    key: "secret".to_string(),
                },
            ),
            &registry,
        );

        client.get_json("/cards", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let client = ResilientClient::new(
            fast_config("svc", &server.uri(), AuthScheme::None),
            &registry,
        );

        let err = client.get_json("/cards", &[]).await.unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::Transient));
        // Three internal attempts count as one breaker failure.
        assert_eq!(client.health_snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried_and_breaker_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let client = ResilientClient::new(
            fast_config("svc", &server.uri(), AuthScheme::None),
            &registry,
        );

        let err = client.get_json("/cards", &[]).await.unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::Authentication));
        assert_eq!(client.health_snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_captures_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let mut config = fast_config("svc", &server.uri(), AuthScheme::None);
        config.retry.max_attempts = 1;
        let client = ResilientClient::new(config, &registry);

        let err = client.get_json("/cards", &[]).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_network_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cards"))
            .respond_with(ResponseTemplate::new(503))
            // Two logical calls, one attempt each; the third is rejected
            // by the breaker before any request is sent.
            .expect(2)
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let mut config = fast_config("svc", &server.uri(), AuthScheme::None);
        config.retry.max_attempts = 1;
        config.breaker = BreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        };
        let client = ResilientClient::new(config, &registry);

        client.get_json("/cards", &[]).await.unwrap_err();
        client.get_json("/cards", &[]).await.unwrap_err();
        assert_eq!(client.health_snapshot().state, CircuitState::Open);

        let err = client.get_json("/cards", &[]).await.unwrap_err();
        assert!(matches!(err, SourceError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_client_credentials_token_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let registry = CircuitBreakerRegistry::new();
        let client = ResilientClient::new(
            fast_config(
                "svc",
                &server.uri(),
                AuthScheme::ClientCredentials {
                    token_url: format!("{}/oauth/token", server.uri()),
                    client_id: "id".to_string(),
                    client_secret: "secret".to_string(),
                },
            ),
            &registry,
        );

        client.get_json("/catalog", &[]).await.unwrap();
        client.get_json("/catalog", &[]).await.unwrap();
    }
}
