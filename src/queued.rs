//! Component G: queued ingestion — stage one or many sources' bytes into
//! blob containers, then submit a blob list to the data-management
//! endpoint and poll for terminal status. Grounded in
//! `Azure-azure-kusto-rust`'s `queued_ingest_client.rs` for the
//! submit/status envelope shape, with retry delegated to [`crate::retry`]
//! and fan-out upload delegated to
//! [`crate::blob_upload::BlobUploadContainer::upload_batch`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::blob_upload::BlobUploadContainer;
use crate::config_cache::ConfigurationCache;
use crate::container_selector::{resolve_pool, ContainerSelector, UploadMethod};
use crate::error::IngestError;
use crate::http_client::{HttpRequest, HttpResponse, TokenBackedClient};
use crate::models::{
    BatchIngestionOperation, BlobDescriptor, BlobFailureStatus, BlobStatus, IngestResponseWire,
    IngestionOperation, QueuedStatusResponse, QueuedSubmitBody,
};
use crate::properties::{DataFormat, IngestRequestProperties};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::source::{prepare_source, IngestionSource, SourceId};

const INGEST_AUDIENCE: &str = "https://kusto.kusto.windows.net";

/// Drives blob-staged ("queued") ingestion: stage, submit, and poll for a
/// terminal status.
pub struct QueuedIngestionDriver {
    dm_endpoint: String,
    http: Arc<TokenBackedClient>,
    config_cache: Arc<ConfigurationCache>,
    container_selector: ContainerSelector,
    blob_upload: BlobUploadContainer,
    retry_policy: RetryPolicy,
}

impl QueuedIngestionDriver {
    pub fn new(
        dm_endpoint: impl Into<String>,
        http: Arc<TokenBackedClient>,
        config_cache: Arc<ConfigurationCache>,
        blob_upload: BlobUploadContainer,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            dm_endpoint: dm_endpoint.into(),
            http,
            config_cache,
            container_selector: ContainerSelector::new(),
            blob_upload,
            retry_policy,
        }
    }

    /// Stages `source` into a container and submits it for ingestion into
    /// `database.table`, returning a pollable handle.
    pub async fn ingest(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<IngestionOperation, IngestError> {
        properties.validate_against(None)?;
        let source_id = SourceId::new();

        let blob_uri = match source {
            IngestionSource::Blob { uri, .. } => uri.clone(),
            _ => {
                let format = properties.effective_format(None).unwrap_or(DataFormat::Csv);
                let prepared = prepare_source(source, format).await?;
                let config = self.config_cache.get_or_refresh(&self.http).await?;
                let pool = resolve_pool(&config, UploadMethod::Default)?;
                let container = self.container_selector.next(pool)?;
                self.blob_upload
                    .upload(
                        container,
                        &source.name(),
                        prepared.bytes,
                        prepared.content_encoding,
                    )
                    .await?
            }
        };

        let descriptor = BlobDescriptor {
            blob_path: blob_uri.clone(),
            raw_data_size: None,
            source_id: source_id.to_string(),
        };

        let operation_id = self.submit(database, table, vec![descriptor], properties).await?;

        Ok(IngestionOperation {
            operation_id,
            source_id,
            blob_uri,
            database: database.to_string(),
            table: table.to_string(),
        })
    }

    /// Stages every local source in `sources` (in parallel, via
    /// [`BlobUploadContainer::upload_batch`]) and submits the resulting blob
    /// list as one queued-ingestion request. `Blob` sources are referenced
    /// directly without being re-uploaded. When `fail_on_partial_upload_error`
    /// is set and any source failed to stage, the whole batch is rejected
    /// with [`IngestError::PartialUpload`] rather than submitting a partial
    /// blob list; otherwise the successfully staged sources are submitted and
    /// the failures are silently dropped from the request (the caller already
    /// has no way to recover their bytes once `upload_batch` gave up on a
    /// source after its retries).
    pub async fn ingest_batch(
        &self,
        database: &str,
        table: &str,
        sources: &[IngestionSource],
        properties: &IngestRequestProperties,
        fail_on_partial_upload_error: bool,
    ) -> Result<BatchIngestionOperation, IngestError> {
        properties.validate_against(None)?;
        let format = properties.effective_format(None).unwrap_or(DataFormat::Csv);

        let mut descriptors = Vec::with_capacity(sources.len());
        let mut source_ids = Vec::with_capacity(sources.len());
        let mut to_upload = Vec::new();

        for source in sources {
            let source_id = SourceId::new();
            source_ids.push(source_id);
            match source {
                IngestionSource::Blob { uri, size_bytes } => descriptors.push(BlobDescriptor {
                    blob_path: uri.clone(),
                    raw_data_size: *size_bytes,
                    source_id: source_id.to_string(),
                }),
                _ => to_upload.push((source_id, source.clone())),
            }
        }

        if !to_upload.is_empty() {
            let config = self.config_cache.get_or_refresh(&self.http).await?;
            let pool = resolve_pool(&config, UploadMethod::Default)?;
            let batch = self
                .blob_upload
                .upload_batch(&self.container_selector, pool, &to_upload, format)
                .await?;

            if fail_on_partial_upload_error && !batch.failures.is_empty() {
                let permanent = batch.failures.iter().all(|f| f.error.is_permanent());
                return Err(IngestError::PartialUpload {
                    failed: batch.failures.len(),
                    total: to_upload.len(),
                    permanent,
                });
            }
            descriptors.extend(batch.successes.iter().map(|s| BlobDescriptor {
                blob_path: s.blob_uri.clone(),
                raw_data_size: None,
                source_id: s.source_id.to_string(),
            }));
        }

        if descriptors.is_empty() {
            return Err(IngestError::PartialUpload {
                failed: to_upload.len(),
                total: to_upload.len(),
                permanent: true,
            });
        }

        let operation_id = self.submit(database, table, descriptors, properties).await?;

        Ok(BatchIngestionOperation {
            operation_id,
            source_ids,
        })
    }

    /// §4.G step 4: `POST {dmUrl}/v1/rest/ingestion/queued/{database}/{table}`
    /// with body `{ timestamp, blobs, properties }`, returning the service's
    /// `ingestionOperationId`. Shared by the single-source and batch submit
    /// paths.
    async fn submit(
        &self,
        database: &str,
        table: &str,
        blobs: Vec<BlobDescriptor>,
        properties: &IngestRequestProperties,
    ) -> Result<String, IngestError> {
        let url = format!(
            "{}/v1/rest/ingestion/queued/{}/{}",
            self.dm_endpoint, database, table
        );
        let body = QueuedSubmitBody {
            timestamp: Utc::now().to_rfc3339(),
            blobs,
            properties: properties.into(),
        };

        let response: IngestResponseWire = retry_with_backoff(&self.retry_policy, || {
            let body = &body;
            let url = &url;
            async move {
                let response = self.http.post_json(INGEST_AUDIENCE, url, body).await?;
                if !response.is_success() {
                    return Err(submit_error(response));
                }
                serde_json::from_slice(&response.body).map_err(|e| IngestError::IngestSubmit {
                    message: format!("malformed submit response: {e}"),
                    http_status: response.status,
                    permanent: true,
                })
            }
        })
        .await?;

        Ok(response.ingestion_operation_id.unwrap_or_default())
    }

    /// §4.G `getStatus`: calls with `details=false` first and escalates to
    /// `details=true` when the summary shows a failure or every expected
    /// blob has reached a terminal state.
    async fn get_status(
        &self,
        database: &str,
        table: &str,
        operation_id: &str,
        expected_blobs: usize,
    ) -> Result<QueuedStatusResponse, IngestError> {
        let summary = self.get_status_once(database, table, operation_id, false).await?;
        if summary.should_escalate_to_details(expected_blobs) {
            return self.get_status_once(database, table, operation_id, true).await;
        }
        Ok(summary)
    }

    async fn get_status_once(
        &self,
        database: &str,
        table: &str,
        operation_id: &str,
        details: bool,
    ) -> Result<QueuedStatusResponse, IngestError> {
        let url = format!(
            "{}/v1/rest/ingestion/queued/{}/{}/{}?details={}",
            self.dm_endpoint, database, table, operation_id, details
        );
        let request = HttpRequest::get(url.as_str()).with_header("Accept", "application/json");
        let response = self.http.send(INGEST_AUDIENCE, request).await?;
        if !response.is_success() {
            return Err(status_error(response));
        }
        serde_json::from_slice(&response.body).map_err(|e| IngestError::IngestStatus {
            message: format!("malformed status response: {e}"),
            permanent: true,
        })
    }

    /// Polls `operation`'s status once. Returns `Ok(None)` until the blob
    /// shows up with a terminal status in the (possibly escalated) detail
    /// list.
    pub async fn poll_status(
        &self,
        operation: &IngestionOperation,
    ) -> Result<Option<BlobStatus>, IngestError> {
        let response = self
            .get_status(&operation.database, &operation.table, &operation.operation_id, 1)
            .await?;
        let source_id = operation.source_id.to_string();
        let entry = response
            .details
            .unwrap_or_default()
            .into_iter()
            .find(|d| d.source_id.as_deref() == Some(source_id.as_str()));
        match entry {
            Some(status) if status.status.is_terminal() => Ok(Some(status)),
            _ => Ok(None),
        }
    }

    /// Polls `operation`'s batch status until every blob reaches a terminal
    /// state or `timeout` elapses, whichever comes first. Never returns a
    /// non-terminal status: on timeout, raises a transient
    /// [`IngestError::Timeout`] instead.
    pub async fn poll_until_completion(
        &self,
        database: &str,
        table: &str,
        operation: &BatchIngestionOperation,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<BlobStatus>, IngestError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(IngestError::Timeout {
                    elapsed_secs: timeout.as_secs(),
                });
            }
            let statuses = match tokio::time::timeout(
                remaining,
                self.batch_status(database, table, operation),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(IngestError::Timeout {
                        elapsed_secs: timeout.as_secs(),
                    })
                }
            };
            if !statuses.is_empty() && statuses.iter().all(|s| s.status.is_terminal()) {
                return Ok(statuses);
            }
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }
    }

    async fn batch_status(
        &self,
        database: &str,
        table: &str,
        operation: &BatchIngestionOperation,
    ) -> Result<Vec<BlobStatus>, IngestError> {
        let response = self
            .get_status(database, table, &operation.operation_id, operation.source_ids.len())
            .await?;
        Ok(response.details.unwrap_or_default())
    }
}

/// §4.G step 5: classifies a non-2xx submit response. A `404` means the
/// endpoint itself wasn't found (the cluster may predate queued ingestion)
/// and is transient, matching [`crate::http_client`]'s own submit-status
/// handling; every other non-2xx status follows the same 408/429/5xx rule.
fn submit_error(response: HttpResponse) -> IngestError {
    if response.status == 404 {
        return IngestError::IngestSubmit {
            message: "endpoint not found; cluster may not support queued ingestion".to_string(),
            http_status: 404,
            permanent: false,
        };
    }
    let permanent = !matches!(response.status, 408 | 429) && !(500..600).contains(&response.status);
    IngestError::IngestSubmit {
        message: String::from_utf8_lossy(&response.body).to_string(),
        http_status: response.status,
        permanent,
    }
}

/// §4.G `getStatus` non-2xx handling: a response carrying any `details`
/// entry with `failureStatus == Transient`, or a bare `404`, is transient;
/// everything else is permanent.
fn status_error(response: HttpResponse) -> IngestError {
    if response.status == 404 {
        return IngestError::IngestStatus {
            message: "endpoint not found; cluster may not support queued ingestion".to_string(),
            permanent: false,
        };
    }
    let parsed: Option<QueuedStatusResponse> = serde_json::from_slice(&response.body).ok();
    let has_transient_detail = parsed
        .as_ref()
        .and_then(|r| r.details.as_ref())
        .map(|details| {
            details
                .iter()
                .any(|d| matches!(d.failure_status, Some(BlobFailureStatus::Transient)))
        })
        .unwrap_or(false);

    IngestError::IngestStatus {
        message: String::from_utf8_lossy(&response.body).to_string(),
        permanent: !has_transient_detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusSummary;
    use crate::properties::{CompressionType, DataFormat};
    use bytes::Bytes;

    #[test]
    fn submit_error_marks_404_transient_with_required_message() {
        let response = HttpResponse {
            status: 404,
            body: Bytes::new(),
        };
        let err = submit_error(response);
        assert!(!err.is_permanent());
        assert_eq!(
            err.to_string(),
            "ingest submit failed (404): endpoint not found; cluster may not support queued ingestion"
        );
    }

    #[test]
    fn submit_error_marks_other_4xx_permanent() {
        let response = HttpResponse {
            status: 400,
            body: Bytes::from_static(b"bad request"),
        };
        assert!(submit_error(response).is_permanent());
    }

    #[test]
    fn submit_error_marks_5xx_transient() {
        let response = HttpResponse {
            status: 503,
            body: Bytes::new(),
        };
        assert!(!submit_error(response).is_permanent());
    }

    #[test]
    fn status_error_404_is_transient() {
        let response = HttpResponse {
            status: 404,
            body: Bytes::new(),
        };
        assert!(!status_error(response).is_permanent());
    }

    #[test]
    fn status_error_with_transient_detail_is_transient() {
        let body = br#"{"Status":{"Failed":1},"Details":[{"Status":"Failed","FailureStatus":"Transient"}]}"#;
        let response = HttpResponse {
            status: 500,
            body: Bytes::from_static(body),
        };
        assert!(!status_error(response).is_permanent());
    }

    #[test]
    fn status_error_without_transient_detail_is_permanent() {
        let body = br#"{"Status":{"Failed":1},"Details":[{"Status":"Failed","FailureStatus":"Permanent"}]}"#;
        let response = HttpResponse {
            status: 500,
            body: Bytes::from_static(body),
        };
        assert!(status_error(response).is_permanent());
    }

    #[test]
    fn summary_escalates_when_any_blob_failed() {
        let summary = QueuedStatusResponse {
            status: StatusSummary {
                succeeded: 1,
                failed: 1,
                skipped: 0,
                in_progress: 0,
            },
            details: None,
        };
        assert!(summary.should_escalate_to_details(3));
    }

    #[test]
    fn summary_escalates_when_all_blobs_terminal() {
        let summary = QueuedStatusResponse {
            status: StatusSummary {
                succeeded: 3,
                failed: 0,
                skipped: 0,
                in_progress: 0,
            },
            details: None,
        };
        assert!(summary.should_escalate_to_details(3));
    }

    #[test]
    fn summary_does_not_escalate_while_in_progress() {
        let summary = QueuedStatusResponse {
            status: StatusSummary {
                succeeded: 1,
                failed: 0,
                skipped: 0,
                in_progress: 2,
            },
            details: None,
        };
        assert!(!summary.should_escalate_to_details(3));
    }

    #[test]
    fn submit_body_includes_timestamp_and_properties() {
        let props = IngestRequestProperties::new()
            .with_format(DataFormat::Json)
            .with_mapping_reference("my mapping");
        let body = QueuedSubmitBody {
            timestamp: Utc::now().to_rfc3339(),
            blobs: vec![BlobDescriptor {
                blob_path: "https://acct.blob.core.windows.net/c/b1?sig=x".into(),
                raw_data_size: Some(10),
                source_id: "00000000-0000-0000-0000-000000000000".into(),
            }],
            properties: (&props).into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"timestamp\""));
        assert!(json.contains("\"blobs\""));
        assert!(json.contains("ingestionMappingReference"));
        let _ = CompressionType::None;
    }

    #[test]
    fn submit_url_targets_rest_ingestion_queued_path() {
        let url = format!(
            "{}/v1/rest/ingestion/queued/{}/{}",
            "https://ingest-cluster.kusto.windows.net", "db1", "table1"
        );
        assert_eq!(
            url,
            "https://ingest-cluster.kusto.windows.net/v1/rest/ingestion/queued/db1/table1"
        );
    }

    #[test]
    fn status_url_includes_operation_id_and_details_flag() {
        let url = format!(
            "{}/v1/rest/ingestion/queued/{}/{}/{}?details={}",
            "https://ingest-cluster.kusto.windows.net", "db1", "table1", "op-1", true
        );
        assert_eq!(
            url,
            "https://ingest-cluster.kusto.windows.net/v1/rest/ingestion/queued/db1/table1/op-1?details=true"
        );
    }
}
