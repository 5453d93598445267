use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::debug;

use crate::settings::{ClientSettings, ClientSettingsSource};

pub const CONFIG_PATH_ENV: &str = "COLOSSUS_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "COLOSSUS_CONFIG_JSON";

/// Probed relative to the working directory, in order.
pub const DEFAULT_FILES: &[&str] = &[
    "colossus.toml",
    "colossus.json",
    "config/colossus.toml",
    "config/colossus.json",
];

impl ClientSettings {
    /// Load settings using environment variables.
    /// Evaluation order:
    /// 1) `$COLOSSUS_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$COLOSSUS_CONFIG_JSON` (inline JSON),
    /// 3) the first existing entry of [`DEFAULT_FILES`],
    /// 4) defaults.
    ///
    /// The result is validated before it is returned.
    pub fn load_from_env() -> anyhow::Result<(Self, ClientSettingsSource)> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// Same as [`load_from_env`](Self::load_from_env) with an explicit
    /// variable lookup and base directory for the default files.
    pub fn load_with<F>(lookup: F, base_dir: &Path) -> anyhow::Result<(Self, ClientSettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (settings, source) = Self::resolve(&lookup, base_dir)?;
        settings
            .validate()
            .with_context(|| format!("invalid client settings from {source}"))?;
        debug!(source = %source, "client settings loaded");
        Ok((settings, source))
    }

    fn resolve<F>(lookup: &F, base_dir: &Path) -> anyhow::Result<(Self, ClientSettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, ClientSettingsSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let settings =
                Self::parse_json(&raw).context("failed to parse COLOSSUS_CONFIG_JSON")?;
            return Ok((settings, ClientSettingsSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(base_dir) {
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, ClientSettingsSource::File(path)));
        }

        Ok((Self::default(), ClientSettingsSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read client settings from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid client settings {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid client settings {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parses TOML, falling back to JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse client settings {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid client settings json: {err}"))
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.is_file())
    }
}
