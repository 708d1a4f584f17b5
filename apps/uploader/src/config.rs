//! Uploader configuration.
//!
//! Read from `~/.config/reelup/config.json` (or `--config`). Command-line
//! flags override file values; a file that fails to parse is logged and
//! ignored.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use reelup_client::UploadConfig;

use crate::Cli;

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "REELUP_TOKEN";

/// On-disk shape of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    /// Backend WebSocket URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub upload: UploadConfig,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub token: Option<String>,
    pub upload: UploadConfig,
}

impl ConfigFile {
    /// Loads `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Merges command-line flags and the environment over file values.
    pub fn resolve(self, cli: &Cli, env_token: Option<String>) -> anyhow::Result<Settings> {
        let url = cli
            .url
            .clone()
            .or(self.url)
            .context("no backend URL; pass --url or set \"url\" in the config file")?;

        let mut upload = self.upload;
        if let Some(chunk_size) = cli.chunk_size {
            upload.chunk_size = Some(chunk_size);
        }
        if let Some(concurrency) = cli.concurrency {
            upload.concurrency = concurrency;
        }
        if cli.no_checksums {
            upload.checksums = false;
        }
        upload
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("invalid upload settings")?;

        Ok(Settings {
            url,
            token: env_token.filter(|t| !t.is_empty()).or(self.token),
            upload,
        })
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    config_base_dir().join("reelup").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return PathBuf::from(xdg);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
