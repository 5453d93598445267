use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use colossus_core::{StickyHostConfig, StreamConfig};

use crate::validation::SettingsError;

pub const DEFAULT_COLOSSUS_ENDPOINT: &str = "https://infra.io.vtex.com/colossus/v0";
pub const DEFAULT_BUILDER_ENDPOINT: &str = "https://app.io.vtex.com/vtex.builder-hub/v0";

/// Source that produced the client settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientSettingsSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl std::fmt::Display for ClientSettingsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientSettingsSource::Default => f.write_str("built-in defaults"),
            ClientSettingsSource::EnvPath(path) => {
                write!(f, "{} (from COLOSSUS_CONFIG_PATH)", path.display())
            }
            ClientSettingsSource::EnvInline => f.write_str("COLOSSUS_CONFIG_JSON"),
            ClientSettingsSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Everything a client needs besides the caller's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Base of the event bus (`events` and `logs` endpoints).
    pub colossus_endpoint: String,
    /// Base of the builder app serving availability probes.
    pub builder_endpoint: String,
    /// Overrides the default `colossus/<version>` user agent.
    pub user_agent: Option<String>,
    /// Heartbeat, retry and backoff tuning for every event stream.
    pub stream: StreamConfig,
    /// Drift threshold, probing and host cache for sticky requests.
    pub sticky: StickyHostConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            colossus_endpoint: DEFAULT_COLOSSUS_ENDPOINT.to_owned(),
            builder_endpoint: DEFAULT_BUILDER_ENDPOINT.to_owned(),
            user_agent: None,
            stream: StreamConfig::default(),
            sticky: StickyHostConfig::default(),
        }
    }
}

impl ClientSettings {
    pub fn colossus_url(&self) -> Result<Url, SettingsError> {
        parse_endpoint("colossus_endpoint", &self.colossus_endpoint)
    }

    pub fn builder_url(&self) -> Result<Url, SettingsError> {
        parse_endpoint("builder_endpoint", &self.builder_endpoint)
    }
}

fn parse_endpoint(field: &'static str, value: &str) -> Result<Url, SettingsError> {
    let url = Url::parse(value).map_err(|err| SettingsError::InvalidEndpoint {
        field,
        value: value.to_owned(),
        reason: err.to_string(),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(SettingsError::InvalidEndpoint {
            field,
            value: value.to_owned(),
            reason: "expected an http(s) base URL".to_owned(),
        });
    }
    Ok(url)
}
