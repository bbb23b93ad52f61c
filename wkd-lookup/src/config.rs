//! Configuration file for lookups.
//!
//! All default values live in `config.default.toml`, embedded at compile
//! time. A user file is layered on top of it key by key.

use std::{fs, num::NonZeroU64, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetcher::HttpFetcher;
use crate::handler::WkdSettings;
use crate::keyring::GnupgImporter;

/// Embedded copy of the default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("config.default.toml");

/// Error that can occur when reading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigReadError {
    /// The file did not exist or could not be read.
    #[error("config file not found: {0}")]
    ConfigFileNotFound(#[from] std::io::Error),
    /// The TOML was syntactically invalid or did not match the expected shape.
    #[error("config file is not valid TOML: {0}")]
    ConfigFileNotValid(#[from] toml::de::Error),
    /// Failed to merge defaults with overrides.
    #[error("failed to merge embedded and user TOML: {0}")]
    ConfigMergeError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FetchToml {
    pub timeout_s: NonZeroU64,
    pub user_agent_extra: String,
    pub proxy: Option<Url>,
    pub require_proxy: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LookupToml {
    pub connect_errors_as_not_found: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GpgToml {
    pub binary: PathBuf,
    pub homedir: Option<PathBuf>,
}

/// The overall configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConfigToml {
    /// HTTP transport: timeout, user agent and proxy.
    pub fetch: FetchToml,
    /// How fetch failures are classified.
    pub lookup: LookupToml,
    /// Where materialized keys are imported.
    pub gpg: GpgToml,
}

impl Default for ConfigToml {
    fn default() -> Self {
        ConfigToml::from_str(DEFAULT_CONFIG).expect("Embedded config.default.toml must be valid")
    }
}

impl ConfigToml {
    /// Read a configuration file and overlay it on the embedded defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigReadError> {
        let raw = fs::read_to_string(path)?;
        Self::from_str_with_defaults(&raw)
    }

    /// Parse a raw TOML string and overlay it on the embedded defaults.
    pub fn from_str_with_defaults(raw: &str) -> Result<Self, ConfigReadError> {
        let default_val: toml::Value = DEFAULT_CONFIG.parse()?;
        let user_val: toml::Value = raw.parse()?;

        let merged_val = serde_toml_merge::merge(default_val, user_val)
            .map_err(|e| ConfigReadError::ConfigMergeError(e.to_string()))?;

        Ok(merged_val.try_into()?)
    }

    /// Fetch timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_s.get())
    }

    /// Handler settings described by this config.
    pub fn wkd_settings(&self) -> WkdSettings {
        let mut settings = WkdSettings::new();
        settings
            .timeout(self.timeout())
            .connect_errors_as_not_found(self.lookup.connect_errors_as_not_found);
        settings
    }

    /// HTTP fetcher described by this config.
    pub fn http_fetcher(&self) -> crate::Result<HttpFetcher> {
        let mut builder = HttpFetcher::builder();
        builder
            .user_agent_extra(self.fetch.user_agent_extra.clone())
            .require_proxy(self.fetch.require_proxy);
        if let Some(proxy) = &self.fetch.proxy {
            builder.proxy(proxy.clone());
        }
        builder.build()
    }

    /// GnuPG importer described by this config.
    pub fn gpg_importer(&self) -> GnupgImporter {
        GnupgImporter::new(self.gpg.binary.clone(), self.gpg.homedir.clone())
    }
}

impl FromStr for ConfigToml {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}
