//! Ingestion-request configuration: data formats, compression tags, and the
//! per-request [`IngestRequestProperties`] bag.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// Closed set of data formats the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
    Multijson,
    Avro,
    Apacheavro,
    Parquet,
    Orc,
    Tsv,
    Scsv,
    Sohsv,
    Psv,
    Raw,
    Txt,
    Sstream,
    W3clogfile,
}

impl DataFormat {
    /// Binary formats are never (re-)compressed by this client.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            DataFormat::Avro | DataFormat::Apacheavro | DataFormat::Parquet | DataFormat::Orc
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Json => "json",
            DataFormat::Multijson => "multijson",
            DataFormat::Avro => "avro",
            DataFormat::Apacheavro => "apacheavro",
            DataFormat::Parquet => "parquet",
            DataFormat::Orc => "orc",
            DataFormat::Tsv => "tsv",
            DataFormat::Scsv => "scsv",
            DataFormat::Sohsv => "sohsv",
            DataFormat::Psv => "psv",
            DataFormat::Raw => "raw",
            DataFormat::Txt => "txt",
            DataFormat::Sstream => "sstream",
            DataFormat::W3clogfile => "w3clogfile",
        }
    }
}

/// Compression applied to a source's bytes, distinct from the wire-level
/// gzip this client may additionally apply during upload (see
/// [`crate::source`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Zip,
}

/// Ingestion mapping: either a server-side reference or an inline mapping,
/// never both (see `SPEC_FULL.md` §10 open-question resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionMapping {
    Reference(String),
    Inline(String),
}

/// Tagging applied to ingested extents, mirrored 1:1 onto the service's
/// `additionalProperties` bag.
#[derive(Debug, Clone, Default)]
pub struct AdditionalTags {
    pub tags: Vec<String>,
    pub ingest_if_not_exists: Vec<String>,
    pub drop_by_tags: Vec<String>,
}

/// Per-request configuration passed to every `ingest_*` call.
#[derive(Debug, Clone, Default)]
pub struct IngestRequestProperties {
    pub format: Option<DataFormat>,
    pub mapping: Option<IngestionMapping>,
    pub enable_tracking: bool,
    pub tags: AdditionalTags,
    pub validation_policy: Option<String>,
    pub flush_immediately: bool,
}

impl IngestRequestProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_mapping_reference(mut self, reference: impl Into<String>) -> Self {
        self.mapping = Some(IngestionMapping::Reference(reference.into()));
        self
    }

    pub fn with_inline_mapping(mut self, mapping_json: impl Into<String>) -> Self {
        self.mapping = Some(IngestionMapping::Inline(mapping_json.into()));
        self
    }

    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.enable_tracking = enabled;
        self
    }

    /// Accepts the two historically-separate `ingestionMappingReference` /
    /// inline-`ingestionMapping` fields (as exposed by other Kusto SDKs) and
    /// rejects the request if both are set, rather than silently ingesting
    /// with an ambiguous mapping.
    pub fn with_raw_mapping(
        mut self,
        reference: Option<String>,
        inline: Option<String>,
    ) -> Result<Self> {
        self.mapping = match (reference, inline) {
            (Some(_), Some(_)) => return Err(IngestError::ConflictingMapping),
            (Some(r), None) => Some(IngestionMapping::Reference(r)),
            (None, Some(m)) => Some(IngestionMapping::Inline(m)),
            (None, None) => None,
        };
        Ok(self)
    }

    /// Validates the mutual-exclusivity and format-agreement invariants
    /// before a request is ever built.
    pub fn validate_against(&self, source_format: Option<DataFormat>) -> Result<()> {
        if let (Some(a), Some(b)) = (self.format, source_format) {
            if a != b {
                return Err(IngestError::FormatMismatch {
                    configured: a,
                    source: b,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn effective_format(&self, source_format: Option<DataFormat>) -> Option<DataFormat> {
        self.format.or(source_format)
    }
}

/// JSON body shape for the `properties` field of a queued-ingestion submit.
#[derive(Debug, Serialize)]
pub(crate) struct PropertiesWire {
    pub format: Option<&'static str>,
    #[serde(rename = "ingestionMappingReference", skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_reference: Option<String>,
    #[serde(rename = "ingestionMapping", skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping: Option<String>,
    #[serde(rename = "enableTracking")]
    pub enable_tracking: bool,
}

impl From<&IngestRequestProperties> for PropertiesWire {
    fn from(props: &IngestRequestProperties) -> Self {
        let (reference, inline) = match &props.mapping {
            Some(IngestionMapping::Reference(r)) => (Some(r.clone()), None),
            Some(IngestionMapping::Inline(m)) => (None, Some(m.clone())),
            None => (None, None),
        };
        PropertiesWire {
            format: props.format.map(DataFormat::as_str),
            ingestion_mapping_reference: reference,
            ingestion_mapping: inline,
            enable_tracking: props.enable_tracking,
        }
    }
}
