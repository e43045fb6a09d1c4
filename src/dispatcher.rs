//! Component J: the managed-streaming dispatcher. Prefers streaming
//! ingestion per table, falling back to queued ingestion (and recording a
//! per-table, per-cause backoff) when the service reports streaming is
//! unavailable, the table's schema/update-policy rejects it, or the source
//! is too large for a streaming request. Grounded in the teacher's per-key
//! `DashMap`-backed state tracking (`lib/file-source/src/checkpointer.rs`'s
//! per-file checkpoint map) for the backoff table, and in the teacher's
//! `runWithRetry`-style retry loop (reused here via [`crate::retry`]) for
//! the streaming attempt itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{FailureSubCode, IngestError};
use crate::properties::IngestRequestProperties;
use crate::queued::QueuedIngestionDriver;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::source::{IngestionSource, SourceId};
use crate::streaming::StreamingIngestionDriver;

/// Default duration a table stays routed to queued ingestion after
/// streaming reports its table configuration (schema/update policy, or the
/// service itself) unavailable.
pub const DEFAULT_TIME_UNTIL_RESUMING_STREAMING_INGEST: Duration = Duration::from_secs(60 * 15);

/// Default duration a table stays routed to queued ingestion after a
/// throttled streaming attempt exhausts its retries.
pub const DEFAULT_THROTTLE_BACKOFF_PERIOD: Duration = Duration::from_secs(10);

/// Streaming requests larger than this (scaled by
/// [`ManagedStreamingDispatcher`]'s `data_size_factor`) are routed to queued
/// ingestion without ever attempting a streaming POST.
const STREAMING_MAX_REQUEST_BODY_SIZE: u64 = 4 * 1024 * 1024;

/// Which path actually served a `dispatch` call.
#[derive(Debug)]
pub enum ManagedIngestOutcome {
    Streamed(SourceId),
    Queued(crate::models::IngestionOperation),
}

/// Why a streaming attempt was abandoned. Drives both the backoff-arming
/// table and the `Break`-vs-`Throw` decision after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Throttled,
    StreamingIngestionOff,
    TableConfigurationPreventsStreaming,
    RequestPropertiesPreventStreaming,
    OtherErrors,
    UnknownErrors,
}

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    until: Instant,
    cause: Category,
}

/// Routes each `(database, table)` to streaming ingestion by default,
/// demoting a table to queued ingestion whenever streaming reports the
/// table ineligible, for a duration that depends on *why* (see the
/// backoff-arming table in `SPEC_FULL.md` §4.J).
pub struct ManagedStreamingDispatcher {
    streaming: Arc<StreamingIngestionDriver>,
    queued: Arc<QueuedIngestionDriver>,
    backoff: DashMap<(String, String), BackoffEntry>,
    retry_policy: RetryPolicy,
    throttle_backoff_period: Duration,
    time_until_resuming_streaming_ingest: Duration,
    data_size_factor: f64,
    continue_when_streaming_unavailable: bool,
}

impl ManagedStreamingDispatcher {
    pub fn new(
        streaming: Arc<StreamingIngestionDriver>,
        queued: Arc<QueuedIngestionDriver>,
        backoff_period: Duration,
    ) -> Self {
        Self {
            streaming,
            queued,
            backoff: DashMap::new(),
            retry_policy: RetryPolicy::default(),
            throttle_backoff_period: DEFAULT_THROTTLE_BACKOFF_PERIOD,
            time_until_resuming_streaming_ingest: backoff_period,
            data_size_factor: 1.0,
            continue_when_streaming_unavailable: true,
        }
    }

    /// Overrides the retry schedule the streaming attempt runs under before
    /// any fallback decision is made (§4.J step 4). Defaults to three
    /// attempts at `1s`/`2s`/`4s` plus jitter.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the backoff duration armed when a streaming attempt
    /// exhausts its retries while throttled. Default 10s.
    pub fn with_throttle_backoff_period(mut self, period: Duration) -> Self {
        self.throttle_backoff_period = period;
        self
    }

    /// Overrides the backoff duration armed when streaming is reported
    /// unavailable for table-wide reasons (service off, schema/update-policy
    /// mismatch). Default 15 minutes.
    pub fn with_time_until_resuming_streaming_ingest(mut self, period: Duration) -> Self {
        self.time_until_resuming_streaming_ingest = period;
        self
    }

    /// Scales the streaming-eligibility size threshold (default 4 MiB ×
    /// `factor`); see [`crate::client::Builder::data_size_factor`].
    pub fn with_data_size_factor(mut self, factor: f64) -> Self {
        self.data_size_factor = factor;
        self
    }

    /// When `false`, a table whose streaming ingestion is reported off is
    /// never silently demoted to queued: the original error is returned so
    /// the caller sees the real cause. When the stored backoff cause is
    /// `StreamingIngestionOff` and this is `false`, the policy precheck
    /// (§4.J step 2) takes the streaming path anyway rather than going
    /// straight to queued, exposing the same real error on every call.
    pub fn with_continue_when_streaming_unavailable(mut self, continue_when_unavailable: bool) -> Self {
        self.continue_when_streaming_unavailable = continue_when_unavailable;
        self
    }

    /// Dispatches `source` into `database.table`, picking streaming or
    /// queued ingestion adaptively.
    pub async fn ingest(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<ManagedIngestOutcome, IngestError> {
        let key = (database.to_string(), table.to_string());

        if self.should_use_queued_by_policy(&key) {
            return self.run_queued(database, table, source, properties).await;
        }

        let threshold = (STREAMING_MAX_REQUEST_BODY_SIZE as f64 * self.data_size_factor) as u64;
        if let Some(size) = source.known_size().await {
            if size > threshold {
                tracing::debug!(database, table, size, threshold, "source exceeds streaming size threshold, using queued ingestion");
                return self.run_queued(database, table, source, properties).await;
            }
        }

        let outcome = retry_with_backoff(&self.retry_policy, || {
            let streaming = &self.streaming;
            async move { streaming.ingest(database, table, source, properties).await }
        })
        .await;

        match outcome {
            Ok(id) => Ok(ManagedIngestOutcome::Streamed(id)),
            Err(err) => match self.decide_on_exhausted_streaming(&key, &err) {
                Decision::FallBackToQueued => self.run_queued(database, table, source, properties).await,
                Decision::Throw => Err(err),
            },
        }
    }

    async fn run_queued(
        &self,
        database: &str,
        table: &str,
        source: &IngestionSource,
        properties: &IngestRequestProperties,
    ) -> Result<ManagedIngestOutcome, IngestError> {
        self.queued
            .ingest(database, table, source, properties)
            .await
            .map(ManagedIngestOutcome::Queued)
    }

    /// §4.J step 2 (`shouldUseQueuedIngestByPolicy`).
    fn should_use_queued_by_policy(&self, key: &(String, String)) -> bool {
        match self.backoff.get(key) {
            None => false,
            Some(entry) if Instant::now() >= entry.until => {
                drop(entry);
                self.backoff.remove(key);
                false
            }
            Some(entry) => {
                if entry.cause == Category::StreamingIngestionOff && !self.continue_when_streaming_unavailable {
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Classifies a streaming error whose retries are exhausted (or which
    /// was permanent on the first attempt), arms backoff per the §4.J
    /// table, and decides whether to fall back to queued or rethrow.
    fn decide_on_exhausted_streaming(&self, key: &(String, String), err: &IngestError) -> Decision {
        let category = classify_category(err);

        let backoff_duration = match category {
            Category::Throttled => Some(self.throttle_backoff_period),
            Category::StreamingIngestionOff | Category::TableConfigurationPreventsStreaming => {
                Some(self.time_until_resuming_streaming_ingest)
            }
            Category::RequestPropertiesPreventStreaming | Category::OtherErrors | Category::UnknownErrors => None,
        };
        if let Some(duration) = backoff_duration {
            self.backoff.insert(
                key.clone(),
                BackoffEntry {
                    until: Instant::now() + duration,
                    cause: category,
                },
            );
        }

        match category {
            Category::RequestPropertiesPreventStreaming | Category::TableConfigurationPreventsStreaming => {
                tracing::debug!(category = ?category, error = %err, "streaming ineligible for this request, falling back to queued");
                Decision::FallBackToQueued
            }
            Category::StreamingIngestionOff => {
                if self.continue_when_streaming_unavailable {
                    tracing::warn!(error = %err, "streaming ingestion off for this table, falling back to queued and backing off");
                    Decision::FallBackToQueued
                } else {
                    Decision::Throw
                }
            }
            Category::Throttled | Category::OtherErrors | Category::UnknownErrors => Decision::Throw,
        }
    }
}

enum Decision {
    FallBackToQueued,
    Throw,
}

/// Classifies a (by now permanent, or transient-but-retry-exhausted)
/// streaming error into a §4.J `Category`, consulting the structured
/// `failureSubCode`/`http_status` fields attached by [`crate::streaming`]
/// rather than re-parsing response bodies.
fn classify_category(err: &IngestError) -> Category {
    match err {
        IngestError::Throttled => Category::Throttled,
        IngestError::ServiceOff { .. } => Category::StreamingIngestionOff,
        IngestError::SchemaMismatch { .. } => Category::TableConfigurationPreventsStreaming,
        IngestError::PayloadTooLarge { .. } => Category::RequestPropertiesPreventStreaming,
        IngestError::IngestSubmit { .. } => match err.failure_sub_code() {
            Some(FailureSubCode::StreamingIngestionPolicyNotEnabled)
            | Some(FailureSubCode::StreamingIngestionDisabledForCluster) => Category::StreamingIngestionOff,
            Some(FailureSubCode::UpdatePolicyIncompatible)
            | Some(FailureSubCode::QuerySchemaDoesNotMatchTableSchema) => {
                Category::TableConfigurationPreventsStreaming
            }
            Some(FailureSubCode::FileTooLarge)
            | Some(FailureSubCode::InputStreamTooLarge)
            | Some(FailureSubCode::KustoRequestPayloadTooLarge) => Category::RequestPropertiesPreventStreaming,
            None => {
                if err.http_status() == Some(413) {
                    Category::RequestPropertiesPreventStreaming
                } else {
                    Category::OtherErrors
                }
            }
        },
        _ => Category::UnknownErrors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureSubCode;

    #[test]
    fn service_off_classifies_as_streaming_ingestion_off() {
        let err = IngestError::ServiceOff {
            message: "off".into(),
            failure_sub_code: Some(FailureSubCode::StreamingIngestionDisabledForCluster),
        };
        assert_eq!(classify_category(&err), Category::StreamingIngestionOff);
    }

    #[test]
    fn schema_mismatch_classifies_as_table_configuration() {
        let err = IngestError::SchemaMismatch {
            message: "bad schema".into(),
            failure_sub_code: Some(FailureSubCode::UpdatePolicyIncompatible),
        };
        assert_eq!(classify_category(&err), Category::TableConfigurationPreventsStreaming);
    }

    #[test]
    fn payload_too_large_classifies_as_request_properties() {
        let err = IngestError::PayloadTooLarge { message: "big".into() };
        assert_eq!(classify_category(&err), Category::RequestPropertiesPreventStreaming);
    }

    #[test]
    fn throttled_classifies_as_throttled() {
        assert_eq!(classify_category(&IngestError::Throttled), Category::Throttled);
    }

    #[test]
    fn unknown_error_classifies_as_unknown_errors() {
        assert_eq!(classify_category(&IngestError::NoContainers), Category::UnknownErrors);
    }

    #[test]
    fn untyped_ingest_submit_without_subcode_classifies_as_other_errors() {
        let err = IngestError::IngestSubmit {
            message: "some other 500".into(),
            http_status: 500,
            permanent: true,
        };
        assert_eq!(classify_category(&err), Category::OtherErrors);
    }
}
