//! Component L (expansion): the `IngestClient` facade tying every
//! component together, plus its `Builder`. Grounded in the teacher's
//! builder split (`lib/vector-api-client/src/client.rs`'s `Client`/config
//! pair) and in `axiom-rs`'s `Client`/`Builder` construction order.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::blob_upload::{BlobUploadContainer, BlobUploader, ReqwestBlobUploader, UploadLimits};
use crate::config_cache::{ConfigurationCache, DEFAULT_REFRESH_PERIOD};
use crate::dispatcher::{
    ManagedIngestOutcome, ManagedStreamingDispatcher, DEFAULT_THROTTLE_BACKOFF_PERIOD,
    DEFAULT_TIME_UNTIL_RESUMING_STREAMING_INGEST,
};
use crate::endpoint::{to_ingest_endpoint, to_query_endpoint};
use crate::error::IngestError;
use crate::http_client::{ClientDetails, HttpClient, ReqwestHttpClient, TokenBackedClient, TokenProvider};
use crate::models::{BatchIngestionOperation, BlobStatus, IngestionOperation};
use crate::properties::IngestRequestProperties;
use crate::queued::QueuedIngestionDriver;
use crate::retry::RetryPolicy;
use crate::source::{IngestionSource, SourceId};
use crate::streaming::StreamingIngestionDriver;
use crate::trusted_endpoints::{TrustedEndpoints, PUBLIC_LOGIN_ENDPOINT};

/// Construction-time options for [`IngestClient`]. Build with [`Builder`].
pub struct IngestClientOptions {
    pub cluster_endpoint: String,
    pub login_endpoint: String,
    pub token_provider: Arc<dyn TokenProvider>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub blob_uploader: Option<Arc<dyn BlobUploader>>,
    pub client_details: ClientDetails,
    pub retry_policy: RetryPolicy,
    pub throttle_backoff_period: Duration,
    pub time_until_resuming_streaming_ingest: Duration,
    pub config_refresh_period: Duration,
    pub trusted_endpoints: TrustedEndpoints,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub upload_limits: UploadLimits,
    pub data_size_factor: f64,
    pub continue_when_streaming_unavailable: bool,
}

impl IngestClientOptions {
    pub fn new(cluster_endpoint: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            cluster_endpoint: cluster_endpoint.into(),
            login_endpoint: PUBLIC_LOGIN_ENDPOINT.to_string(),
            token_provider,
            http_client: None,
            blob_uploader: None,
            client_details: ClientDetails::default(),
            retry_policy: RetryPolicy::default(),
            throttle_backoff_period: DEFAULT_THROTTLE_BACKOFF_PERIOD,
            time_until_resuming_streaming_ingest: DEFAULT_TIME_UNTIL_RESUMING_STREAMING_INGEST,
            config_refresh_period: DEFAULT_REFRESH_PERIOD,
            trusted_endpoints: TrustedEndpoints::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            upload_limits: UploadLimits::default(),
            data_size_factor: 1.0,
            continue_when_streaming_unavailable: true,
        }
    }
}

/// Fluent builder over [`IngestClientOptions`], mirroring `axiom-rs`'s
/// `Client::builder()` chain.
pub struct Builder {
    options: IngestClientOptions,
}

impl Builder {
    pub fn new(cluster_endpoint: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            options: IngestClientOptions::new(cluster_endpoint, token_provider),
        }
    }

    pub fn login_endpoint(mut self, login_endpoint: impl Into<String>) -> Self {
        self.options.login_endpoint = login_endpoint.into();
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.options.http_client = Some(client);
        self
    }

    pub fn blob_uploader(mut self, uploader: Arc<dyn BlobUploader>) -> Self {
        self.options.blob_uploader = Some(uploader);
        self
    }

    pub fn client_details(mut self, details: ClientDetails) -> Self {
        self.options.client_details = details;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = policy;
        self
    }

    /// Backoff armed when a streaming attempt exhausts its retries while
    /// throttled (§4.J `THROTTLED` category). Default 10s.
    pub fn throttle_backoff_period(mut self, period: Duration) -> Self {
        self.options.throttle_backoff_period = period;
        self
    }

    /// Backoff armed when streaming is reported unavailable for table-wide
    /// reasons: service off, or schema/update-policy mismatch (§4.J
    /// `STREAMING_INGESTION_OFF` / `TABLE_CONFIGURATION_PREVENTS_STREAMING`
    /// categories). Default 15 minutes.
    pub fn time_until_resuming_streaming_ingest(mut self, period: Duration) -> Self {
        self.options.time_until_resuming_streaming_ingest = period;
        self
    }

    pub fn config_refresh_period(mut self, period: Duration) -> Self {
        self.options.config_refresh_period = period;
        self
    }

    pub fn trusted_endpoints(mut self, trusted_endpoints: TrustedEndpoints) -> Self {
        self.options.trusted_endpoints = trusted_endpoints;
        self
    }

    /// When `true`, bypasses the packaged-allowlist and HTTPS-only checks
    /// that [`TrustedEndpoints::validate`] would otherwise enforce.
    pub fn skip_security_checks(mut self, skip: bool) -> Self {
        self.options.trusted_endpoints = self.options.trusted_endpoints.enforce(!skip);
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.options.upload_limits.max_concurrency = max_concurrency;
        self
    }

    pub fn max_data_size(mut self, max_data_size: u64) -> Self {
        self.options.upload_limits.max_data_size = max_data_size;
        self
    }

    pub fn ignore_file_size(mut self, ignore_file_size: bool) -> Self {
        self.options.upload_limits.ignore_file_size = ignore_file_size;
        self
    }

    /// Scales the managed-streaming dispatcher's size threshold for
    /// preferring a streaming request over a queued one.
    pub fn data_size_factor(mut self, factor: f64) -> Self {
        self.options.data_size_factor = factor;
        self
    }

    /// See [`crate::dispatcher::ManagedStreamingDispatcher::with_continue_when_streaming_unavailable`].
    pub fn continue_when_streaming_unavailable(mut self, continue_when_unavailable: bool) -> Self {
        self.options.continue_when_streaming_unavailable = continue_when_unavailable;
        self
    }

    pub fn build(self) -> Result<IngestClient, IngestError> {
        IngestClient::from_options(self.options)
    }
}

/// Entry point for all three ingestion methods. Owns a background task
/// that periodically refreshes the configuration cache; drop or call
/// [`IngestClient::close`] to stop it.
pub struct IngestClient {
    queued: Arc<QueuedIngestionDriver>,
    streaming: Arc<StreamingIngestionDriver>,
    dispatcher: ManagedStreamingDispatcher,
    config_refresh_task: Option<JoinHandle<()>>,
}

impl IngestClient {
    pub fn builder(cluster_endpoint: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Builder {
        Builder::new(cluster_endpoint, token_provider)
    }

    fn from_options(options: IngestClientOptions) -> Result<Self, IngestError> {
        let engine_endpoint = to_query_endpoint(&options.cluster_endpoint);
        let dm_endpoint = to_ingest_endpoint(&options.cluster_endpoint);

        options
            .trusted_endpoints
            .validate(&engine_endpoint, &options.login_endpoint)?;
        options
            .trusted_endpoints
            .validate(&dm_endpoint, &options.login_endpoint)?;

        let transport = match options.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new(
                options.connect_timeout,
                options.read_timeout,
            )?),
        };
        let http = Arc::new(TokenBackedClient::new(
            transport,
            options.token_provider,
            options.client_details,
        ));

        let config_cache = Arc::new(ConfigurationCache::new(dm_endpoint.clone()));
        let blob_uploader = options
            .blob_uploader
            .unwrap_or_else(|| Arc::new(ReqwestBlobUploader::new(reqwest::Client::new())));
        let blob_upload = BlobUploadContainer::new(blob_uploader, options.upload_limits);

        let queued = Arc::new(QueuedIngestionDriver::new(
            dm_endpoint,
            http.clone(),
            config_cache.clone(),
            blob_upload,
            options.retry_policy.clone(),
        ));
        let streaming = Arc::new(StreamingIngestionDriver::new(engine_endpoint, http.clone()));
        let dispatcher = ManagedStreamingDispatcher::new(
            streaming.clone(),
            queued.clone(),
            options.time_until_resuming_streaming_ingest,
        )
        .with_retry_policy(options.retry_policy.clone())
        .with_throttle_backoff_period(options.throttle_backoff_period)
        .with_data_size_factor(options.data_size_factor)
        .with_continue_when_streaming_unavailable(options.continue_when_streaming_unavailable);

        let refresh_period = options.config_refresh_period;
        let refresh_http = http.clone();
        let refresh_cache = config_cache.clone();
        let config_refresh_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_period);
            loop {
                ticker.tick().await;
                if let Err(error) = refresh_cache.refresh(&refresh_http).await {
                    tracing::warn!(%error, "background configuration refresh failed");
                }
            }
        }));

        Ok(Self {
            queued,
            streaming,
            dispatcher,
            config_refresh_task,
        })
    }

    /// Queued (blob-staged) ingestion: durable, higher latency, any size.
    pub async fn ingest_queued(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<IngestionOperation, IngestError> {
        self.queued.ingest(database, table, source, properties).await
    }

    /// Polls a queued operation for its terminal status.
    pub async fn poll_status(&self, operation: &IngestionOperation) -> Result<Option<BlobStatus>, IngestError> {
        self.queued.poll_status(operation).await
    }

    /// Queued ingestion for many sources at once: stages every local source
    /// concurrently (bounded by [`Builder::max_concurrency`]) and submits one
    /// multi-blob request.
    pub async fn ingest_queued_batch(
        &self,
        database: &str,
        table: &str,
        sources: &[IngestionSource],
        properties: &IngestRequestProperties,
        fail_on_partial_upload_error: bool,
    ) -> Result<BatchIngestionOperation, IngestError> {
        self.queued
            .ingest_batch(database, table, sources, properties, fail_on_partial_upload_error)
            .await
    }

    /// Polls `operation` until every blob reaches a terminal state or
    /// `timeout` elapses.
    pub async fn poll_until_completion(
        &self,
        database: &str,
        table: &str,
        operation: &BatchIngestionOperation,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<BlobStatus>, IngestError> {
        self.queued
            .poll_until_completion(database, table, operation, poll_interval, timeout)
            .await
    }

    /// Streaming ingestion: low latency, small payloads, synchronous result.
    pub async fn ingest_streaming(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<SourceId, IngestError> {
        self.streaming.ingest(database, table, source, properties).await
    }

    /// Adaptive hybrid: streaming by default, falling back to queued with
    /// per-table backoff when streaming reports itself unavailable.
    pub async fn ingest_managed(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<ManagedIngestOutcome, IngestError> {
        self.dispatcher.ingest(database, table, source, properties).await
    }

    /// Stops the background configuration-refresh task. Subsequent
    /// `ingest_*` calls still work, refreshing the cache on demand.
    pub fn close(&mut self) {
        if let Some(handle) = self.config_refresh_task.take() {
            handle.abort();
        }
    }
}

impl Drop for IngestClient {
    fn drop(&mut self) {
        self.close();
    }
}
