//! Component C: a token-backed HTTP wrapper around the caller-injected
//! [`HttpClient`] and [`TokenProvider`]. Grounded in `yaxitech-vector`'s
//! `azure_monitor_logs_dce/auth.rs` (`AzureAuthenticator`) for the
//! cache-and-refresh shape, and in `lib/datadog/remote-config/src/client.rs`
//! / `lib/api_client/src/client.rs` for the thin request/response wrapper
//! shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::IngestError;

/// An opaque bearer token with an expiry, as returned by the caller's token
/// provider (e.g. an MSAL/`azure_identity` credential).
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: Instant,
}

/// Injected token acquisition. Out of scope for this crate's own
/// implementation (see `SPEC_FULL.md` §1) beyond the trait boundary and a
/// `StaticTokenProvider` convenience impl for tests/simple deployments.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    async fn get_token(&self, audience: &str) -> Result<AccessToken, IngestError>;
}

/// A provider that always returns the same token, useful for testing and
/// for callers who manage refresh themselves.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _audience: &str) -> Result<AccessToken, IngestError> {
        Ok(AccessToken {
            secret: self.token.clone(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        })
    }
}

/// HTTP verb, kept narrow since this client only ever issues GET and POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully-built outbound request, independent of any particular transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A transport response: status plus raw body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Injected HTTP transport. Out of scope for this crate's own semantics
/// (see `SPEC_FULL.md` §1); [`ReqwestHttpClient`] is provided as a ready
/// default backed by `reqwest`.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, IngestError>;
}

/// Default transport, built on `reqwest` with `rustls`, matching the
/// teacher's own `reqwest`-based API clients (`lib/api_client/src/client.rs`,
/// `lib/datadog/remote-config/src/client.rs`).
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| IngestError::network(e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, IngestError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder.send().await.map_err(|e| IngestError::network(e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::network(e))?;
        Ok(HttpResponse { status, body })
    }
}

/// Free-form tracing headers applied to every outbound request, mirroring
/// the teacher's `x-ms-*` conventions.
#[derive(Debug, Clone, Default)]
pub struct ClientDetails {
    pub client_version: Option<String>,
    pub application: Option<String>,
    pub user: Option<String>,
}

impl ClientDetails {
    fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        if let Some(v) = &self.client_version {
            request = request.with_header("x-ms-client-version", v.clone());
        }
        if let Some(v) = &self.application {
            request = request.with_header("x-ms-app", v.clone());
        }
        if let Some(v) = &self.user {
            request = request.with_header("x-ms-user", v.clone());
        }
        request
    }
}

const TOKEN_SAFETY_WINDOW: Duration = Duration::from_secs(60);

/// Per-audience single-flight token cache. The cached token itself lives in
/// an [`ArcSwapOption`] so fast-path reads never block on the refresh lock;
/// the `Mutex` only serializes concurrent *refreshes*.
#[derive(Default)]
struct CachedToken {
    token: ArcSwapOption<AccessToken>,
    refresh_lock: Mutex<()>,
}

/// Wraps an [`HttpClient`] with bearer-token injection, per-audience token
/// caching/refresh, and JSON (de)serialization.
#[derive(Debug)]
pub struct TokenBackedClient {
    transport: Arc<dyn HttpClient>,
    token_provider: Arc<dyn TokenProvider>,
    client_details: ClientDetails,
    cache: DashMap<String, Arc<CachedToken>>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("has_token", &self.token.load().is_some())
            .finish()
    }
}

impl TokenBackedClient {
    pub fn new(
        transport: Arc<dyn HttpClient>,
        token_provider: Arc<dyn TokenProvider>,
        client_details: ClientDetails,
    ) -> Self {
        Self {
            transport,
            token_provider,
            client_details,
            cache: DashMap::new(),
        }
    }

    async fn token_for(&self, audience: &str) -> Result<String, IngestError> {
        let entry = self
            .cache
            .entry(audience.to_string())
            .or_insert_with(|| Arc::new(CachedToken::default()))
            .clone();

        // Fast path: a still-fresh token needs no lock beyond the atomic load.
        if let Some(token) = fresh_token(&entry) {
            return Ok(token.secret.clone());
        }

        // Slow path: at most one refresh in flight per audience. Re-check
        // freshness under the lock, since another task may have refreshed
        // while we waited for it.
        let _guard = entry.refresh_lock.lock().await;
        if let Some(token) = fresh_token(&entry) {
            return Ok(token.secret.clone());
        }

        tracing::debug!(audience, "refreshing access token");
        let fresh = self.token_provider.get_token(audience).await?;
        let secret = fresh.secret.clone();
        entry.token.store(Some(Arc::new(fresh)));
        Ok(secret)
    }

    /// Sends `request`, injecting the bearer token and tracing headers, and
    /// returns the raw response. Callers classify status codes themselves
    /// (see [`crate::queued`] / [`crate::streaming`] for the 2xx/4xx/5xx
    /// mapping into [`IngestError`]).
    pub async fn send(&self, audience: &str, request: HttpRequest) -> Result<HttpResponse, IngestError> {
        let token = self.token_for(audience).await?;
        let request = self.client_details.apply(request);
        let request = request.with_header("Authorization", format!("Bearer {token}"));
        self.transport.execute(request).await
    }

    /// Convenience for JSON GET requests.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        audience: &str,
        url: &str,
    ) -> Result<T, IngestError> {
        let request = HttpRequest::get(url).with_header("Accept", "application/json");
        let response = self.send(audience, request).await?;
        if !response.is_success() {
            return Err(status_error(&response));
        }
        serde_json::from_slice(&response.body).map_err(|e| IngestError::Network {
            message: format!("invalid JSON response: {e}"),
        })
    }

    /// Convenience for JSON POST requests, returning the raw response so
    /// callers can apply endpoint-specific status handling.
    pub async fn post_json<B: Serialize>(
        &self,
        audience: &str,
        url: &str,
        body: &B,
    ) -> Result<HttpResponse, IngestError> {
        let payload = serde_json::to_vec(body).map_err(|e| IngestError::Network {
            message: format!("failed to serialize request body: {e}"),
        })?;
        let request = HttpRequest::post(url, Bytes::from(payload))
            .with_header("Content-Type", "application/json");
        self.send(audience, request).await
    }

    /// POST with a raw byte body (e.g. streaming ingestion), returning the
    /// raw response.
    pub async fn post_bytes(
        &self,
        audience: &str,
        url: &str,
        body: Bytes,
        content_type: &str,
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse, IngestError> {
        let mut request = HttpRequest::post(url, body).with_header("Content-Type", content_type);
        for (name, value) in extra_headers {
            request = request.with_header(name.clone(), value.clone());
        }
        self.send(audience, request).await
    }
}

/// Returns the cached token if present and still outside the safety window.
fn fresh_token(entry: &Arc<CachedToken>) -> Option<Arc<AccessToken>> {
    let token = entry.token.load_full()?;
    if Instant::now() < token.expires_at.saturating_sub(TOKEN_SAFETY_WINDOW) {
        Some(token)
    } else {
        None
    }
}

fn status_error(response: &HttpResponse) -> IngestError {
    let permanent = !matches!(response.status, 408 | 429) && !(500..600).contains(&response.status);
    let permanent = permanent && response.status != 404;
    IngestError::IngestSubmit {
        message: String::from_utf8_lossy(&response.body).to_string(),
        http_status: response.status,
        permanent,
    }
}
