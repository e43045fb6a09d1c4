//! Component D: a hot-swappable cache of the service's ingestion
//! configuration (container list / resource URIs / ingestion capacity),
//! refreshed on a background interval. Grounded in the teacher's
//! `ArcSwap`-behind-a-table-search hot-reload pattern
//! (`lib/enrichment/src/tables.rs`'s `Arc<ArcSwap<Option<TableMap>>>`) and
//! in `resource_manager.rs`'s periodic-refresh shape.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Deserialize;

use crate::error::IngestError;
use crate::http_client::TokenBackedClient;

/// A single blob container the service has handed out for staged uploads.
/// `base_uri` is the container's scheme+host+path with no query string;
/// `sas` is the `?...` SAS query the service attached to it.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub base_uri: String,
    pub sas: String,
}

impl ContainerInfo {
    pub fn container_url(&self) -> String {
        format!("{}{}", self.base_uri, self.sas)
    }
}

/// Raw shape of the `GET {dmUrl}/v1/rest/ingestion/configuration` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConfigurationResponse {
    #[serde(rename = "containerSettings")]
    container_settings: ContainerSettingsWire,
}

#[derive(Debug, Clone, Deserialize)]
struct ContainerSettingsWire {
    #[serde(default)]
    containers: Vec<ContainerWire>,
    #[serde(rename = "lakeFolders", default)]
    lake_folders: Vec<ContainerWire>,
    #[serde(rename = "preferredUploadMethod", default)]
    preferred_upload_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContainerWire {
    uri: String,
}

/// The resolved configuration the rest of the client consumes.
#[derive(Debug, Clone, Default)]
pub struct IngestionConfiguration {
    pub containers: Vec<ContainerInfo>,
    pub lake_folders: Vec<ContainerInfo>,
    pub preferred_upload_method: Option<String>,
}

impl IngestionConfiguration {
    fn from_wire(response: ConfigurationResponse) -> Self {
        let settings = response.container_settings;
        Self {
            containers: settings.containers.iter().filter_map(|c| parse_sas_uri(&c.uri)).collect(),
            lake_folders: settings.lake_folders.iter().filter_map(|c| parse_sas_uri(&c.uri)).collect(),
            preferred_upload_method: settings.preferred_upload_method,
        }
    }
}

fn parse_sas_uri(uri: &str) -> Option<ContainerInfo> {
    let mut parsed = url::Url::parse(uri).ok()?;
    let sas = match parsed.query() {
        Some(q) => format!("?{q}"),
        None => String::new(),
    };
    parsed.set_query(None);
    Some(ContainerInfo {
        base_uri: parsed.to_string(),
        sas,
    })
}

const CONFIG_AUDIENCE: &str = "https://kusto.kusto.windows.net";

/// Holds the latest [`IngestionConfiguration`] behind an [`ArcSwapOption`]
/// and knows how to refresh it from the data-management endpoint.
pub struct ConfigurationCache {
    dm_endpoint: String,
    current: ArcSwapOption<IngestionConfiguration>,
}

impl ConfigurationCache {
    pub fn new(dm_endpoint: impl Into<String>) -> Self {
        Self {
            dm_endpoint: dm_endpoint.into(),
            current: ArcSwapOption::empty(),
        }
    }

    /// Returns the cached configuration, if one has been fetched yet.
    pub fn get(&self) -> Option<Arc<IngestionConfiguration>> {
        self.current.load_full()
    }

    /// Fetches the configuration from the service and replaces the cache.
    /// On error, the previous value (if any) is left in place for the next
    /// caller to retry against.
    pub async fn refresh(&self, client: &TokenBackedClient) -> Result<Arc<IngestionConfiguration>, IngestError> {
        let url = format!("{}/v1/rest/ingestion/configuration", self.dm_endpoint);
        let raw: ConfigurationResponse = client.get_json(CONFIG_AUDIENCE, &url).await?;
        let config = Arc::new(IngestionConfiguration::from_wire(raw));
        self.current.store(Some(config.clone()));
        Ok(config)
    }

    /// Returns the cached configuration if present, otherwise fetches it.
    pub async fn get_or_refresh(
        &self,
        client: &TokenBackedClient,
    ) -> Result<Arc<IngestionConfiguration>, IngestError> {
        if let Some(config) = self.get() {
            return Ok(config);
        }
        self.refresh(client).await
    }
}

/// Default interval between background refreshes of the configuration
/// cache, matching the teacher's `resource_manager.rs` 1-hour default.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sas_uri_into_container_info() {
        let uri = "https://myaccount.blob.core.windows.net/container1?sv=2021&sig=abc";
        let info = parse_sas_uri(uri).unwrap();
        assert_eq!(info.base_uri, "https://myaccount.blob.core.windows.net/container1");
        assert!(info.sas.starts_with("?sv="));
    }

    #[test]
    fn builds_configuration_from_wire_shape() {
        let raw: ConfigurationResponse = serde_json::from_str(
            r#"{
                "containerSettings": {
                    "containers": [{"uri": "https://acct1.blob.core.windows.net/c1?sig=a"}],
                    "lakeFolders": [{"uri": "https://acct1.dfs.core.windows.net/f1?sig=b"}],
                    "preferredUploadMethod": "Lake"
                }
            }"#,
        )
        .unwrap();
        let config = IngestionConfiguration::from_wire(raw);
        assert_eq!(config.containers.len(), 1);
        assert_eq!(config.lake_folders.len(), 1);
        assert_eq!(config.preferred_upload_method.as_deref(), Some("Lake"));
    }

    #[test]
    fn missing_lake_folders_defaults_to_empty() {
        let raw: ConfigurationResponse = serde_json::from_str(
            r#"{"containerSettings": {"containers": [{"uri": "https://acct1.blob.core.windows.net/c1?sig=a"}]}}"#,
        )
        .unwrap();
        let config = IngestionConfiguration::from_wire(raw);
        assert_eq!(config.containers.len(), 1);
        assert!(config.lake_folders.is_empty());
        assert!(config.preferred_upload_method.is_none());
    }
}
