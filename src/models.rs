//! Wire-shape response types shared between the queued and streaming
//! ingestion drivers.

use serde::{Deserialize, Serialize};

/// Result of a successful streaming-ingestion POST.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingIngestResult {
    #[serde(rename = "IngestionSourceId", default)]
    pub ingestion_source_id: Option<String>,
}

/// One blob entry in a queued-ingestion submit's `blobs` list.
#[derive(Debug, Serialize)]
pub(crate) struct BlobDescriptor {
    #[serde(rename = "BlobPath")]
    pub blob_path: String,
    #[serde(rename = "RawDataSize", skip_serializing_if = "Option::is_none")]
    pub raw_data_size: Option<u64>,
    #[serde(rename = "SourceId")]
    pub source_id: String,
}

/// Terminal status of one queued blob, as returned by the status poll.
/// `Pending`/`Queued` mean the service hasn't processed it yet; `Skipped`
/// counts as terminal alongside `Succeeded`/`Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum IngestionStatus {
    Pending,
    Queued,
    Succeeded,
    Failed,
    Skipped,
}

impl IngestionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Whether a blob-level failure is worth retrying. Present only when
/// `status == Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BlobFailureStatus {
    Transient,
    Permanent,
}

/// One blob's detail entry within a queued-status response.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStatus {
    #[serde(rename = "SourceId", default)]
    pub source_id: Option<String>,
    #[serde(rename = "Status")]
    pub status: IngestionStatus,
    #[serde(rename = "FailureStatus", default)]
    pub failure_status: Option<BlobFailureStatus>,
    #[serde(rename = "Details", default)]
    pub details: Option<String>,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

/// Aggregate counts returned alongside (or instead of) per-blob `details`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct StatusSummary {
    #[serde(rename = "Succeeded", default)]
    pub succeeded: u32,
    #[serde(rename = "Failed", default)]
    pub failed: u32,
    #[serde(rename = "Skipped", default)]
    pub skipped: u32,
    #[serde(rename = "InProgress", default)]
    pub in_progress: u32,
}

impl StatusSummary {
    fn terminal_count(&self) -> u32 {
        self.succeeded + self.failed + self.skipped
    }
}

/// Response to `GET .../queued/{db}/{table}/{operationId}?details={bool}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct QueuedStatusResponse {
    #[serde(rename = "Status", default)]
    pub status: StatusSummary,
    #[serde(rename = "Details", default)]
    pub details: Option<Vec<BlobStatus>>,
}

impl QueuedStatusResponse {
    /// Whether the summary alone (without per-blob `details`) indicates the
    /// `getStatus` escalation from `details=false` to `details=true` should
    /// happen: some blob failed, or every expected blob has reached a
    /// terminal state.
    pub fn should_escalate_to_details(&self, expected_blobs: usize) -> bool {
        self.status.failed > 0 || self.status.terminal_count() as usize >= expected_blobs
    }
}

/// A handle returned from [`crate::queued::QueuedIngestionDriver::ingest`],
/// allowing the caller to poll for the blob's terminal status.
#[derive(Debug, Clone)]
pub struct IngestionOperation {
    pub operation_id: String,
    pub source_id: crate::source::SourceId,
    pub blob_uri: String,
    pub(crate) database: String,
    pub(crate) table: String,
}

/// Body of a queued-ingestion submit: the envelope required by
/// `POST {dmUrl}/v1/rest/ingestion/queued/{database}/{table}`, shared by the
/// single-source and batch submit paths.
#[derive(Debug, Serialize)]
pub(crate) struct QueuedSubmitBody {
    pub timestamp: String,
    pub blobs: Vec<BlobDescriptor>,
    pub properties: crate::properties::PropertiesWire,
}

/// Response to a queued-ingestion submit.
#[derive(Debug, Deserialize)]
pub(crate) struct IngestResponseWire {
    #[serde(rename = "IngestionOperationId", default)]
    pub ingestion_operation_id: Option<String>,
}

/// A handle returned from
/// [`crate::queued::QueuedIngestionDriver::ingest_batch`], tracking every
/// source id staged as part of one multi-blob submit.
#[derive(Debug, Clone)]
pub struct BatchIngestionOperation {
    pub operation_id: String,
    pub source_ids: Vec<crate::source::SourceId>,
}
