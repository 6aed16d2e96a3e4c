use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::domain::{Endpoint, InvalidEndpoint, RetentionPolicy, DEFAULT_MAX_ENTRIES, EVICTION_BATCH};

/// `max_entries` below this is accepted but logged as a warning
pub const RECOMMENDED_MIN_ENTRIES: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to download server list: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("invalid server address: {0}")]
    Endpoint(#[from] InvalidEndpoint),

    #[error("invalid value for {key}: {value:?}")]
    Value { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where samples are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(other.to_string()),
        }
    }
}

/// Keys accepted in the optional TOML file named by `MCWATCH_CONFIG`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub servers: Option<Vec<String>>,
    pub servers_url: Option<String>,
    pub database_url: Option<String>,
    pub storage: Option<StorageBackend>,
    pub poll_interval: Option<u64>,
    pub probe_timeout: Option<u64>,
    pub max_entries: Option<usize>,
    pub eviction_batch: Option<usize>,
    pub auto_clean: Option<bool>,
    pub max_response_entries: Option<usize>,
    pub default_response_entries: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub servers: Vec<String>,
    pub servers_url: Option<String>,
    pub database_url: String,
    pub storage: StorageBackend,
    /// Target cycle period in seconds
    pub poll_interval: u64,
    /// Per-probe bound in seconds
    pub probe_timeout: u64,
    pub max_entries: usize,
    pub eviction_batch: usize,
    pub auto_clean: bool,
    pub max_response_entries: usize,
    pub default_response_entries: usize,
    pub log_level: String,
}

/// Parse an override, failing loudly on a malformed value
fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Value { key, value }),
        None => Ok(None),
    }
}

fn parse_bool_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match lookup(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Value { key, value }),
        },
        None => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Defaults, then the TOML file named by `MCWATCH_CONFIG`, then `MCWATCH_*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env::var("MCWATCH_CONFIG") {
            Ok(path) => FileConfig::load(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::from_sources(file, |key| env::var(key).ok())
    }

    pub fn from_sources(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            port: parse_var(&lookup, "MCWATCH_PORT")?
                .or(file.port)
                .unwrap_or(3000),
            servers: lookup("MCWATCH_SERVERS")
                .map(|s| split_list(&s))
                .or(file.servers)
                .unwrap_or_default(),
            servers_url: lookup("MCWATCH_SERVERS_URL").or(file.servers_url),
            database_url: lookup("MCWATCH_DATABASE_URL")
                .or(file.database_url)
                .unwrap_or_else(|| "sqlite:data.db".to_string()),
            storage: match lookup("MCWATCH_STORAGE") {
                Some(value) => value
                    .parse()
                    .map_err(|_| ConfigError::Value { key: "MCWATCH_STORAGE", value })?,
                None => file.storage.unwrap_or(StorageBackend::Sqlite),
            },
            poll_interval: parse_var(&lookup, "MCWATCH_POLL_INTERVAL")?
                .or(file.poll_interval)
                .unwrap_or(10),
            probe_timeout: parse_var(&lookup, "MCWATCH_PROBE_TIMEOUT")?
                .or(file.probe_timeout)
                .unwrap_or(5),
            max_entries: parse_var(&lookup, "MCWATCH_MAX_ENTRIES")?
                .or(file.max_entries)
                .unwrap_or(DEFAULT_MAX_ENTRIES),
            eviction_batch: parse_var(&lookup, "MCWATCH_EVICTION_BATCH")?
                .or(file.eviction_batch)
                .unwrap_or(EVICTION_BATCH),
            auto_clean: parse_bool_var(&lookup, "MCWATCH_AUTO_CLEAN")?
                .or(file.auto_clean)
                .unwrap_or(true),
            max_response_entries: parse_var(&lookup, "MCWATCH_MAX_RESPONSE_ENTRIES")?
                .or(file.max_response_entries)
                .unwrap_or(1000),
            default_response_entries: parse_var(&lookup, "MCWATCH_DEFAULT_RESPONSE_ENTRIES")?
                .or(file.default_response_entries)
                .unwrap_or(240),
            log_level: lookup("MCWATCH_LOG_LEVEL")
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() && self.servers_url.is_none() {
            return Err(ConfigError::Invalid(
                "no servers configured (set MCWATCH_SERVERS or MCWATCH_SERVERS_URL)".to_string(),
            ));
        }
        for server in &self.servers {
            Endpoint::parse(server.as_str())?;
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::Invalid("poll_interval must be positive".to_string()));
        }
        if self.probe_timeout == 0 {
            return Err(ConfigError::Invalid("probe_timeout must be positive".to_string()));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Invalid("max_entries must be positive".to_string()));
        }
        if !(1..=self.max_entries).contains(&self.eviction_batch) {
            return Err(ConfigError::Invalid(format!(
                "eviction_batch must be between 1 and max_entries ({})",
                self.max_entries
            )));
        }
        if self.max_response_entries == 0 || self.default_response_entries == 0 {
            return Err(ConfigError::Invalid("response entry limits must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_entries: self.max_entries,
            eviction_batch: self.eviction_batch,
            enabled: self.auto_clean,
        }
    }

    /// Final endpoint list: configured servers plus the remote list, sorted and deduplicated
    pub async fn resolve_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        let mut raw = self.servers.clone();

        if let Some(url) = &self.servers_url {
            info!(%url, "Downloading server list");
            let body = reqwest::get(url).await?.error_for_status()?.text().await?;
            raw.extend(parse_server_list(&body));
        }

        let endpoints = collect_endpoints(raw)?;
        if endpoints.is_empty() {
            return Err(ConfigError::Invalid("server list is empty".to_string()));
        }
        Ok(endpoints)
    }
}

/// One address per line; blank lines and `#` comments are skipped
pub fn parse_server_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn collect_endpoints(raw: impl IntoIterator<Item = String>) -> Result<Vec<Endpoint>, ConfigError> {
    let unique: BTreeSet<Endpoint> = raw
        .into_iter()
        .map(Endpoint::parse)
        .collect::<Result<_, _>>()?;
    Ok(unique.into_iter().collect())
}
