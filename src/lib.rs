//! Client library for ingesting tabular data into a managed columnar
//! analytics service's engine and data-management endpoints, via direct
//! streaming, blob-staged queued, or adaptive managed-streaming ingestion.
//!
//! The three entry points are [`client::IngestClient::ingest_streaming`],
//! [`client::IngestClient::ingest_queued`], and
//! [`client::IngestClient::ingest_managed`], plus
//! [`client::IngestClient::ingest_queued_batch`] for staging many sources
//! in one parallel upload; construct a client with
//! [`client::IngestClient::builder`].

pub mod blob_upload;
pub mod client;
pub mod config_cache;
pub mod container_selector;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod http_client;
pub mod models;
pub mod properties;
pub mod queued;
pub mod retry;
pub mod source;
pub mod streaming;
pub mod trusted_endpoints;

pub use client::{Builder, IngestClient, IngestClientOptions};
pub use error::{IngestError, Result};
pub use properties::{CompressionType, DataFormat, IngestRequestProperties, IngestionMapping};
pub use source::{IngestionSource, SourceId};
