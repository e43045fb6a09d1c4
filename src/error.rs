//! Typed errors shared across every component.
//!
//! Every outward-facing failure from this crate is an [`IngestError`]. Each
//! variant carries enough structure (`http_status`, `failure_sub_code`,
//! `permanent`) that callers and the managed-streaming dispatcher can make
//! retry/fallback decisions without string-matching on `Display` output.

use std::fmt;

use snafu::Snafu;

use crate::properties::DataFormat;

/// Sub-code attached to certain permanent streaming failures, used by the
/// dispatcher to pick an error category without re-parsing the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSubCode {
    StreamingIngestionPolicyNotEnabled,
    StreamingIngestionDisabledForCluster,
    UpdatePolicyIncompatible,
    QuerySchemaDoesNotMatchTableSchema,
    FileTooLarge,
    InputStreamTooLarge,
    KustoRequestPayloadTooLarge,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngestError {
    #[snafu(display("invalid connection string or untrusted endpoint: {message}"))]
    InvalidConnectionString { message: String },

    #[snafu(display("authentication failed: {message}"))]
    Authentication { message: String },

    #[snafu(display("network error: {message}"))]
    Network { message: String },

    #[snafu(display("request was throttled (429)"))]
    Throttled,

    #[snafu(display("payload too large: {message}"))]
    PayloadTooLarge { message: String },

    #[snafu(display("streaming ingestion is unavailable: {message}"))]
    ServiceOff {
        message: String,
        failure_sub_code: Option<FailureSubCode>,
    },

    #[snafu(display("schema/update-policy mismatch: {message}"))]
    SchemaMismatch {
        message: String,
        failure_sub_code: Option<FailureSubCode>,
    },

    #[snafu(display("ingest submit failed ({http_status}): {message}"))]
    IngestSubmit {
        message: String,
        http_status: u16,
        permanent: bool,
    },

    #[snafu(display("ingestion reported blob-level failures: {message}"))]
    IngestStatus { message: String, permanent: bool },

    #[snafu(display("partial upload failure: {} of {} sources failed", failed, total))]
    PartialUpload {
        failed: usize,
        total: usize,
        permanent: bool,
    },

    #[snafu(display("compression error: {message}"))]
    Compression { message: String },

    #[snafu(display("source not found: {path}"))]
    SourceNotFound { path: String },

    #[snafu(display("source not readable: {path}"))]
    SourceNotReadable { path: String },

    #[snafu(display("source is empty: {path}"))]
    SourceIsEmpty { path: String },

    #[snafu(display("polling timed out after {elapsed_secs}s"))]
    Timeout { elapsed_secs: u64 },

    #[snafu(display("operation not supported: {message}"))]
    Unsupported { message: String },

    #[snafu(display("format {configured:?} does not agree with source format {source:?}"))]
    FormatMismatch {
        configured: DataFormat,
        source: DataFormat,
    },

    #[snafu(display(
        "ingestionMapping and ingestionMappingReference are mutually exclusive"
    ))]
    ConflictingMapping,

    #[snafu(display("no containers or lake folders available from configuration"))]
    NoContainers,

    #[snafu(display("invalid argument: {message}"))]
    IllegalArgument { message: String },
}

impl IngestError {
    /// Whether retrying the same request is expected to fail again.
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::InvalidConnectionString { .. } => true,
            IngestError::Authentication { .. } => true,
            IngestError::Network { .. } => false,
            IngestError::Throttled => false,
            IngestError::PayloadTooLarge { .. } => true,
            IngestError::ServiceOff { .. } => true,
            IngestError::SchemaMismatch { .. } => true,
            IngestError::IngestSubmit { permanent, .. } => *permanent,
            IngestError::IngestStatus { permanent, .. } => *permanent,
            IngestError::PartialUpload { permanent, .. } => *permanent,
            IngestError::Compression { .. } => true,
            IngestError::SourceNotFound { .. } => true,
            IngestError::SourceNotReadable { .. } => true,
            IngestError::SourceIsEmpty { .. } => true,
            IngestError::Timeout { .. } => false,
            IngestError::Unsupported { .. } => true,
            IngestError::FormatMismatch { .. } => true,
            IngestError::ConflictingMapping => true,
            IngestError::NoContainers => true,
            IngestError::IllegalArgument { .. } => true,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            IngestError::IngestSubmit { http_status, .. } => Some(*http_status),
            IngestError::Throttled => Some(429),
            IngestError::PayloadTooLarge { .. } => Some(413),
            _ => None,
        }
    }

    pub fn failure_sub_code(&self) -> Option<FailureSubCode> {
        match self {
            IngestError::ServiceOff {
                failure_sub_code, ..
            }
            | IngestError::SchemaMismatch {
                failure_sub_code, ..
            } => *failure_sub_code,
            _ => None,
        }
    }

    pub(crate) fn network(message: impl fmt::Display) -> Self {
        IngestError::Network {
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
