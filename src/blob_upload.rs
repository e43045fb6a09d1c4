//! Component F: staging a prepared source's bytes into an Azure Blob
//! container ahead of queued ingestion. Grounded in the
//! `geneva-uploader`/`opentelemetry-exporter-geneva` blob-PUT pattern
//! (SAS-authenticated `PUT` with `x-ms-blob-type: BlockBlob`) and in the
//! teacher's own plain-`reqwest` usage for non-token-backed calls
//! (`lib/api_client/src/client.rs`).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config_cache::ContainerInfo;
use crate::container_selector::ContainerSelector;
use crate::error::IngestError;
use crate::properties::DataFormat;
use crate::source::{prepare_source, IngestionSource, SourceId};

/// Uploads bytes to a SAS-authenticated blob URL. Split out as a trait so
/// tests can substitute an in-memory fake instead of talking to Azure.
#[async_trait]
pub trait BlobUploader: Send + Sync + std::fmt::Debug {
    async fn put_block_blob(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        bytes: Bytes,
        content_encoding: Option<&str>,
    ) -> Result<String, IngestError>;
}

/// Default uploader, built on a plain (non-token-backed) `reqwest::Client`
/// since blob SAS tokens carry their own authorization.
#[derive(Debug, Clone)]
pub struct ReqwestBlobUploader {
    client: reqwest::Client,
}

impl ReqwestBlobUploader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobUploader for ReqwestBlobUploader {
    async fn put_block_blob(
        &self,
        container: &ContainerInfo,
        blob_name: &str,
        bytes: Bytes,
        content_encoding: Option<&str>,
    ) -> Result<String, IngestError> {
        let base = container.container_url();
        let (path, query) = base.split_once('?').unwrap_or((base.as_str(), ""));
        let blob_url = format!("{path}/{blob_name}?{query}");

        let mut request = self
            .client
            .put(&blob_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Length", bytes.len().to_string());
        if let Some(encoding) = content_encoding {
            request = request.header("Content-Encoding", encoding);
        }

        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| IngestError::network(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::IngestSubmit {
                message: format!("blob upload failed: {body}"),
                http_status: status.as_u16(),
                permanent: !status.is_server_error() && status.as_u16() != 429,
            });
        }
        Ok(blob_url)
    }
}

/// Per-batch upload limits: size gate and fan-out width.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    /// Sources larger than this (when their size is knowable up front) are
    /// rejected with [`IngestError::PayloadTooLarge`] before any bytes are
    /// read, unless `ignore_file_size` is set.
    pub max_data_size: u64,
    pub ignore_file_size: bool,
    /// Maximum number of uploads run concurrently within one batch.
    pub max_concurrency: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_data_size: 4 * 1024 * 1024 * 1024,
            ignore_file_size: false,
            max_concurrency: 8,
        }
    }
}

/// One successfully staged source.
#[derive(Debug, Clone)]
pub struct UploadedBlob {
    pub source_id: SourceId,
    pub blob_uri: String,
}

/// One source that failed to stage; carries the triggering error so callers
/// can inspect `is_permanent()` without re-deriving it.
#[derive(Debug)]
pub struct UploadFailure {
    pub source_id: SourceId,
    pub error: IngestError,
}

/// Outcome of a batch upload: `successes.len() + failures.len() ==` the
/// number of sources submitted.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub successes: Vec<UploadedBlob>,
    pub failures: Vec<UploadFailure>,
}

/// Picks a container via the selector and stages prepared source bytes into
/// it, returning the blob's resource URI for use in the queued ingestion's
/// blob descriptor. Runs up to `limits.max_concurrency` uploads in parallel,
/// bounded by a [`Semaphore`], mirroring the teacher's bounded-fan-out sink
/// batching.
pub struct BlobUploadContainer {
    uploader: Arc<dyn BlobUploader>,
    limits: UploadLimits,
}

impl std::fmt::Debug for BlobUploadContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobUploadContainer")
            .field("limits", &self.limits)
            .finish()
    }
}

impl BlobUploadContainer {
    pub fn new(uploader: Arc<dyn BlobUploader>, limits: UploadLimits) -> Self {
        Self { uploader, limits }
    }

    pub async fn upload(
        &self,
        container: &ContainerInfo,
        source_name: &str,
        bytes: Bytes,
        content_encoding: Option<&str>,
    ) -> Result<String, IngestError> {
        let blob_name = format!("{}__{}", Uuid::new_v4(), sanitize_blob_name(source_name));
        self.uploader
            .put_block_blob(container, &blob_name, bytes, content_encoding)
            .await
    }

    /// Stages every local source in `sources` into containers drawn from
    /// `selector`/`pool`, running up to `max_concurrency` uploads at once.
    /// Each source is gated on size (unless `ignore_file_size`), compressed
    /// and read off the async runtime via [`prepare_source`], then PUT to a
    /// container; a failed upload is retried against the next container in
    /// the pool up to `pool.len()` (capped at 3) times before being recorded
    /// as a failure. Never throws on a per-source failure: every source ends
    /// up in exactly one of `successes`/`failures`.
    pub async fn upload_batch(
        &self,
        selector: &ContainerSelector,
        pool: &[ContainerInfo],
        sources: &[(SourceId, IngestionSource)],
        format: DataFormat,
    ) -> Result<BatchResult, IngestError> {
        if pool.is_empty() {
            return Err(IngestError::NoContainers);
        }

        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrency.max(1)));
        let max_attempts = pool.len().min(3).max(1);
        let mut tasks = Vec::with_capacity(sources.len());

        for (source_id, source) in sources {
            let source_id = *source_id;
            let source = source.clone();
            let semaphore = semaphore.clone();
            let uploader = self.uploader.clone();
            let limits = self.limits;
            let containers: Vec<ContainerInfo> = (0..max_attempts)
                .filter_map(|_| selector.next(pool).ok().cloned())
                .collect();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("upload semaphore is never closed");
                let result = upload_one(&uploader, &limits, &containers, &source, format).await;
                (source_id, result)
            }));
        }

        let mut batch = BatchResult::default();
        for task in tasks {
            match task.await {
                Ok((source_id, Ok(blob_uri))) => batch.successes.push(UploadedBlob { source_id, blob_uri }),
                Ok((source_id, Err(error))) => batch.failures.push(UploadFailure { source_id, error }),
                Err(join_error) => batch.failures.push(UploadFailure {
                    source_id: SourceId::new(),
                    error: IngestError::Compression {
                        message: format!("upload task did not complete: {join_error}"),
                    },
                }),
            }
        }
        Ok(batch)
    }
}

async fn upload_one(
    uploader: &Arc<dyn BlobUploader>,
    limits: &UploadLimits,
    containers: &[ContainerInfo],
    source: &IngestionSource,
    format: DataFormat,
) -> Result<String, IngestError> {
    if !limits.ignore_file_size {
        if let Some(size) = source.known_size().await {
            if size > limits.max_data_size {
                return Err(IngestError::PayloadTooLarge {
                    message: format!(
                        "source '{}' is {size} bytes, exceeding max_data_size {}",
                        source.name(),
                        limits.max_data_size
                    ),
                });
            }
        }
    }

    let prepared = prepare_source(source, format).await?;
    let blob_name = format!("{}__{}", Uuid::new_v4(), sanitize_blob_name(&source.name()));

    let mut last_err = None;
    for container in containers {
        match uploader
            .put_block_blob(container, &blob_name, prepared.bytes.clone(), prepared.content_encoding)
            .await
        {
            Ok(uri) => return Ok(uri),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or(IngestError::NoContainers))
}

fn sanitize_blob_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeUploader {
        uploaded: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl BlobUploader for FakeUploader {
        async fn put_block_blob(
            &self,
            _container: &ContainerInfo,
            blob_name: &str,
            bytes: Bytes,
            _content_encoding: Option<&str>,
        ) -> Result<String, IngestError> {
            self.uploaded
                .lock()
                .unwrap()
                .push((blob_name.to_string(), bytes.len()));
            Ok(format!("https://fake.blob.core.windows.net/c/{blob_name}"))
        }
    }

    fn container() -> ContainerInfo {
        ContainerInfo {
            base_uri: "https://acct.blob.core.windows.net/container1".into(),
            sas: "?sig=x".into(),
        }
    }

    #[tokio::test]
    async fn uploads_with_sanitized_name() {
        let uploader = Arc::new(FakeUploader::default());
        let staging = BlobUploadContainer::new(uploader.clone(), UploadLimits::default());
        let uri = staging
            .upload(&container(), "my data/file.csv", Bytes::from_static(b"hi"), None)
            .await
            .unwrap();
        assert!(uri.starts_with("https://fake.blob.core.windows.net/c/"));
        assert_eq!(uploader.uploaded.lock().unwrap().len(), 1);
        let (name, len) = &uploader.uploaded.lock().unwrap()[0];
        assert!(!name.contains('/'));
        assert_eq!(*len, 2);
    }

    #[tokio::test]
    async fn batch_uploads_every_source_concurrently() {
        let uploader = Arc::new(FakeUploader::default());
        let staging = BlobUploadContainer::new(uploader.clone(), UploadLimits::default());
        let selector = ContainerSelector::new();
        let pool = vec![container()];
        let sources = vec![
            (SourceId::new(), IngestionSource::from_bytes(Bytes::from_static(b"a"), "a.csv")),
            (SourceId::new(), IngestionSource::from_bytes(Bytes::from_static(b"b"), "b.csv")),
        ];

        let result = staging
            .upload_batch(&selector, &pool, &sources, DataFormat::Csv)
            .await
            .unwrap();

        assert_eq!(result.successes.len(), 2);
        assert!(result.failures.is_empty());
        assert_eq!(uploader.uploaded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_rejects_oversized_sources_without_reading_them() {
        let uploader = Arc::new(FakeUploader::default());
        let limits = UploadLimits {
            max_data_size: 1,
            ..UploadLimits::default()
        };
        let staging = BlobUploadContainer::new(uploader.clone(), limits);
        let selector = ContainerSelector::new();
        let pool = vec![container()];
        let sources = vec![(
            SourceId::new(),
            IngestionSource::from_bytes(Bytes::from_static(b"too big"), "big.csv"),
        )];

        let result = staging
            .upload_batch(&selector, &pool, &sources, DataFormat::Csv)
            .await
            .unwrap();

        assert!(result.successes.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].error.is_permanent());
        assert!(uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_pool_is_an_error_before_spawning_any_task() {
        let uploader = Arc::new(FakeUploader::default());
        let staging = BlobUploadContainer::new(uploader, UploadLimits::default());
        let selector = ContainerSelector::new();
        let sources = vec![(
            SourceId::new(),
            IngestionSource::from_bytes(Bytes::from_static(b"x"), "x.csv"),
        )];
        let result = staging.upload_batch(&selector, &[], &sources, DataFormat::Csv).await;
        assert!(result.is_err());
    }
}
