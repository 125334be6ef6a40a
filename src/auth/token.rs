//! OAuth2 client-credentials token fetching and caching.
//!
//! The cache holds a single bearer token. Readers share the fast path; a
//! refresh is serialized so that concurrent callers who all find the cache
//! stale produce a single round-trip to the token endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::OAuthConfig;

/// Tokens this close to expiry are treated as already expired.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Upper bound on how long an issued token is trusted.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for a single request to the token endpoint.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: u64,
}

/// Exchanges configured credentials for a fresh token.
pub trait CredentialExchange: Send + Sync {
    fn exchange(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse, TokenError>> + Send + '_>>;
}

/// Client-credentials grant against a token endpoint.
pub struct ClientCredentials {
    token_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
}

impl ClientCredentials {
    pub fn new(config: &OAuthConfig, tls_skip_verify: bool) -> anyhow::Result<Self> {
        let client = crate::http::build_client(
            &BTreeMap::new(),
            tls_skip_verify,
            Some(TOKEN_REQUEST_TIMEOUT),
        )?;

        Ok(Self {
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client,
        })
    }

    fn form_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .finish()
    }
}

impl CredentialExchange for ClientCredentials {
    fn exchange(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse, TokenError>> + Send + '_>> {
        Box::pin(async move {
            debug!("Fetching OAuth token from {}", self.token_url);

            let response = self
                .client
                .post(&self.token_url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(self.form_body())
                .send()
                .await
                .map_err(|e| TokenError::Request(e.to_string()))?;

            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                return Err(TokenError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            response
                .json::<TokenResponse>()
                .await
                .map_err(|e| TokenError::Decode(e.to_string()))
        })
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant, margin: Duration) -> bool {
        !self.value.is_empty()
            && self
                .expires_at
                .checked_sub(margin)
                .is_some_and(|deadline| now < deadline)
    }
}

/// Process-wide holder of one short-lived bearer token.
pub struct TokenCache {
    exchange: Arc<dyn CredentialExchange>,
    margin: Duration,
    cached: RwLock<Option<CachedToken>>,
    /// Serializes refreshes; never taken on the fast path.
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new(exchange: Arc<dyn CredentialExchange>) -> Self {
        Self {
            exchange,
            margin: REFRESH_MARGIN,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Build a cache backed by the client-credentials grant.
    pub fn client_credentials(config: &OAuthConfig, tls_skip_verify: bool) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(ClientCredentials::new(config, tls_skip_verify)?)))
    }

    /// Return a token that is not within the refresh margin of expiry.
    pub async fn get_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let issued = self.exchange.exchange().await?;
        let lifetime = Duration::from_secs(issued.expires_in).min(MAX_TOKEN_LIFETIME);
        let now = Instant::now();
        let expires_at = now.checked_add(lifetime).unwrap_or(now);

        *self.cached.write().await = Some(CachedToken {
            value: issued.access_token.clone(),
            expires_at,
        });

        debug!("OAuth token acquired, expires in {}s", issued.expires_in);
        Ok(issued.access_token)
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fresh_token(&self) -> Option<String> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|token| token.is_fresh(Instant::now(), self.margin))
            .map(|token| token.value.clone())
    }

    #[cfg(test)]
    async fn prime(&self, value: &str, expires_at: Instant) {
        *self.cached.write().await = Some(CachedToken {
            value: value.to_string(),
            expires_at,
        });
    }
}

/// Errors that can occur while refreshing a token.
#[derive(Debug, Clone)]
pub enum TokenError {
    /// The request never produced a response.
    Request(String),
    /// The token endpoint answered with a non-200 status.
    Status { status: u16, body: String },
    /// The response body was not a token response.
    Decode(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "token request failed: {}", msg),
            Self::Status { status, body } => {
                write!(f, "token request failed with status {}: {}", status, body)
            }
            Self::Decode(msg) => write!(f, "failed to decode token response: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::task::JoinSet;

    struct CountingExchange {
        calls: AtomicUsize,
        delay: Duration,
        expires_in: u64,
    }

    impl CountingExchange {
        fn new(delay: Duration) -> Arc<Self> {
            Self::lasting(delay, 3600)
        }

        fn lasting(delay: Duration, expires_in: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                expires_in,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialExchange for CountingExchange {
        fn exchange(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse, TokenError>> + Send + '_>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.delay).await;
                Ok(TokenResponse {
                    access_token: format!("token-{}", n),
                    token_type: "Bearer".to_string(),
                    expires_in: self.expires_in,
                })
            })
        }
    }

    async fn spawn_token_endpoint(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    fn oauth_config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            token_url,
            client_id: "gateway".to_string(),
            client_secret: "s3cret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let exchange = CountingExchange::new(Duration::from_millis(50));
        let cache = Arc::new(TokenCache::new(exchange.clone()));

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get_token().await.unwrap() });
        }

        let mut tokens = Vec::new();
        while let Some(token) = tasks.join_next().await {
            tokens.push(token.unwrap());
        }

        assert_eq!(exchange.calls(), 1);
        assert_eq!(tokens.len(), 16);
        assert!(tokens.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone());
        cache.prime("old", Instant::now() + Duration::from_secs(10)).await;

        let token = cache.get_token().await.unwrap();

        assert_eq!(token, "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_outside_margin_is_reused() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone());
        cache.prime("old", Instant::now() + Duration::from_secs(40)).await;

        let token = cache.get_token().await.unwrap();

        assert_eq!(token, "old");
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let exchange = CountingExchange::new(Duration::ZERO);
        let cache = TokenCache::new(exchange.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");

        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_clamped() {
        let exchange = CountingExchange::lasting(Duration::ZERO, u64::MAX);
        let cache = TokenCache::new(exchange.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(exchange.calls(), 1);

        let cached = cache.cached.read().await.clone().unwrap();
        assert!(cached.expires_at <= Instant::now() + MAX_TOKEN_LIFETIME);
    }

    #[tokio::test]
    async fn test_client_credentials_exchange() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/token",
            post(move |body: String| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let form: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
                        .into_owned()
                        .collect();
                    let has = |k: &str, v: &str| form.iter().any(|(fk, fv)| fk == k && fv == v);
                    let granted = has("grant_type", "client_credentials")
                        && has("client_id", "gateway")
                        && has("client_secret", "s3cret");

                    Json(serde_json::json!({
                        "access_token": if granted { "issued" } else { "wrong-form" },
                        "token_type": "Bearer",
                        "expires_in": 300
                    }))
                }
            }),
        );
        let token_url = spawn_token_endpoint(app).await;

        let cache = TokenCache::client_credentials(&oauth_config(token_url), false).unwrap();

        assert_eq!(cache.get_token().await.unwrap(), "issued");
        assert_eq!(cache.get_token().await.unwrap(), "issued");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_200_is_a_failure() {
        let app = Router::new().route(
            "/token",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "invalid_client") }),
        );
        let token_url = spawn_token_endpoint(app).await;

        let cache = TokenCache::client_credentials(&oauth_config(token_url), false).unwrap();
        let err = cache.get_token().await.unwrap_err();

        match err {
            TokenError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid_client");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_token_error_display() {
        let err = TokenError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "token request failed with status 500: boom");
    }
}
