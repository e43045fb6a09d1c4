//! Integration tests driving `IngestClient` against a mocked HTTP boundary
//! with `wiremock`, the same way the teacher's own sink integration tests
//! stand up a fake endpoint rather than mocking individual methods.

use std::sync::Arc;
use std::time::Duration;

use kusto_ingest::client::IngestClient;
use kusto_ingest::http_client::{AccessToken, TokenProvider};
use kusto_ingest::trusted_endpoints::TrustedEndpoints;
use kusto_ingest::{DataFormat, IngestRequestProperties, IngestionSource};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug)]
struct FixedTokenProvider;

#[async_trait::async_trait]
impl TokenProvider for FixedTokenProvider {
    async fn get_token(&self, _audience: &str) -> Result<AccessToken, kusto_ingest::IngestError> {
        Ok(AccessToken {
            secret: "fake-token".into(),
            expires_at: std::time::Instant::now() + Duration::from_secs(3600),
        })
    }
}

fn allow_any_host() -> TrustedEndpoints {
    TrustedEndpoints::with_override(Box::new(|_host| Some(true)))
}

fn mount_configuration(server: &MockServer, container_uri: String) -> impl std::future::Future<Output = ()> + '_ {
    async move {
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/rest/ingestion/configuration$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "containerSettings": {
                    "containers": [{ "uri": container_uri }],
                    "lakeFolders": [],
                    "preferredUploadMethod": "Storage",
                }
            })))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn streaming_ingest_round_trips_through_mock_engine() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingest/db1/table1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "IngestionSourceId": "11111111-1111-1111-1111-111111111111"
        })))
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .expect("client should build against a mock endpoint");

    let source = IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n1,2\n"), "inline.csv");
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let result = client
        .ingest_streaming("db1", "table1", &source, &properties)
        .await;
    assert!(result.is_ok(), "expected success, got {result:?}");
}

#[tokio::test]
async fn streaming_ingest_surfaces_service_off_as_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingest/db1/table1$"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string("StreamingIngestionDisabledForCluster"),
        )
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .unwrap();

    let source = IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n1,2\n"), "inline.csv");
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let err = client
        .ingest_streaming("db1", "table1", &source, &properties)
        .await
        .unwrap_err();
    assert!(err.is_permanent());
}

#[tokio::test]
async fn queued_ingest_stages_blob_then_submits_envelope() {
    let server = MockServer::start().await;
    mount_configuration(&server, format!("{}/fakeaccount/container1?sig=abc", server.uri())).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "IngestionOperationId": "single-op-1"
        })))
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .unwrap();

    let source = IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n1,2\n"), "inline.csv");
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let operation = client
        .ingest_queued("db1", "table1", &source, &properties)
        .await
        .expect("queued ingestion should succeed");
    assert!(operation.blob_uri.contains("container1"));
    assert_eq!(operation.operation_id, "single-op-1");
}

#[tokio::test]
async fn managed_ingest_falls_back_to_queued_after_service_off() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingest/db1/table1$"))
        .respond_with(ResponseTemplate::new(503).set_body_string("StreamingIngestionPolicyNotEnabled"))
        .mount(&server)
        .await;
    mount_configuration(&server, format!("{}/fakeaccount/container1?sig=abc", server.uri())).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "IngestionOperationId": "fallback-op-1"
        })))
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .unwrap();

    let source = IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n1,2\n"), "inline.csv");
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let outcome = client
        .ingest_managed("db1", "table1", &source, &properties)
        .await
        .expect("managed ingestion should fall back to queued");
    matches!(outcome, kusto_ingest::dispatcher::ManagedIngestOutcome::Queued(_))
        .then_some(())
        .expect("expected a queued outcome after streaming reported itself off");
}

#[tokio::test]
async fn queued_batch_stages_every_source_then_polls_to_completion() {
    let server = MockServer::start().await;
    mount_configuration(&server, format!("{}/fakeaccount/container1?sig=abc", server.uri())).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "IngestionOperationId": "batch-op-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1/batch-op-1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": { "Succeeded": 2, "Failed": 0, "Skipped": 0, "InProgress": 0 },
            "Details": [
                { "SourceId": "00000000-0000-0000-0000-000000000001", "Status": "Succeeded" },
                { "SourceId": "00000000-0000-0000-0000-000000000002", "Status": "Succeeded" },
            ]
        })))
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .unwrap();

    let sources = vec![
        IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n1,2\n"), "one.csv"),
        IngestionSource::from_bytes(bytes::Bytes::from_static(b"a,b\n3,4\n"), "two.csv"),
    ];
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let operation = client
        .ingest_queued_batch("db1", "table1", &sources, &properties, true)
        .await
        .expect("batch ingestion should succeed");
    assert_eq!(operation.source_ids.len(), 2);
    assert_eq!(operation.operation_id, "batch-op-1");

    let statuses = client
        .poll_until_completion(
            "db1",
            "table1",
            &operation,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .expect("polling should observe a terminal status");
    assert_eq!(statuses.len(), 2);
}

#[tokio::test]
async fn queued_status_escalates_to_details_when_summary_shows_failures() {
    let server = MockServer::start().await;
    mount_configuration(&server, format!("{}/fakeaccount/container1?sig=abc", server.uri())).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "IngestionOperationId": "failing-op-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/rest/ingestion/queued/db1/table1/failing-op-1$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": { "Succeeded": 0, "Failed": 1, "Skipped": 0, "InProgress": 0 },
            "Details": [
                {
                    "SourceId": "00000000-0000-0000-0000-000000000003",
                    "Status": "Failed",
                    "FailureStatus": "Permanent",
                    "ErrorCode": "BadRequest"
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = IngestClient::builder(server.uri(), Arc::new(FixedTokenProvider))
        .trusted_endpoints(allow_any_host())
        .build()
        .unwrap();

    let sources = vec![IngestionSource::from_bytes(
        bytes::Bytes::from_static(b"a,b\n1,2\n"),
        "one.csv",
    )];
    let properties = IngestRequestProperties::new().with_format(DataFormat::Csv);

    let operation = client
        .ingest_queued_batch("db1", "table1", &sources, &properties, true)
        .await
        .expect("batch ingestion should succeed");

    let statuses = client
        .poll_until_completion(
            "db1",
            "table1",
            &operation,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .expect("polling should observe a terminal (failed) status");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].error_code.as_deref(), Some("BadRequest"));
}
