use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, CollectorResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// TCP port for the ingest protocol (fire-and-forget log lines).
    pub ingest_port: u16,
    /// TCP port for the one-shot query protocol.
    pub query_port: u16,
    /// Fixed capacity of the in-memory log buffer.
    pub buffer_capacity: usize,
    /// Maximum stored bytes per log line; excess is truncated, not rejected.
    pub max_line_len: usize,
    /// Upper bound on simultaneously-handled connections across both ports.
    pub max_connections: usize,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory holding `current.log` and rotated files. Created at
    /// startup when persistence is enabled; untouched otherwise.
    pub directory: String,
    pub max_file_size_mb: u64,
    /// Depth of the writer's bounded queue; overflow drops the entry
    /// rather than stalling an ingest handler.
    pub queue_depth: usize,
}

impl CollectorConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    ///
    /// Environment variables always override config file settings for
    /// critical values.
    pub fn load() -> CollectorResult<Self> {
        let config_path = std::env::var("COLLECTOR_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/collector/collector.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using environment variables",
                config_path
            );
            Self::from_env()
        };

        // Environment variables override file config for critical settings
        if let Some(port) = parse_env("COLLECTOR_INGEST_PORT") {
            config.ingest_port = port;
        }
        if let Some(port) = parse_env("COLLECTOR_QUERY_PORT") {
            config.query_port = port;
        }
        if let Some(enabled) = parse_env("COLLECTOR_PERSIST_ENABLED") {
            config.persistence.enabled = enabled;
        }
        if let Ok(dir) = std::env::var("COLLECTOR_PERSIST_DIR") {
            config.persistence.directory = dir;
        }

        Ok(config)
    }

    /// Load configuration from TOML file.
    pub fn from_file(path: &str) -> CollectorResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| CollectorError::Config(format!("cannot open {path}: {e}")))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| CollectorError::Config(format!("cannot read {path}: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| CollectorError::Config(format!("cannot parse {path}: {e}")))
    }

    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ingest_port: parse_env("COLLECTOR_INGEST_PORT").unwrap_or(defaults.ingest_port),
            query_port: parse_env("COLLECTOR_QUERY_PORT").unwrap_or(defaults.query_port),
            buffer_capacity: parse_env("COLLECTOR_BUFFER_CAPACITY")
                .unwrap_or(defaults.buffer_capacity),
            max_line_len: parse_env("COLLECTOR_MAX_LINE_LEN").unwrap_or(defaults.max_line_len),
            max_connections: parse_env("COLLECTOR_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            persistence: PersistenceConfig::from_env(),
        }
    }

    /// Validate that configuration values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingest_port == 0 {
            return Err("ingest_port must be > 0".to_string());
        }
        if self.query_port == 0 {
            return Err("query_port must be > 0".to_string());
        }
        if self.ingest_port == self.query_port {
            return Err("ingest_port and query_port must differ".to_string());
        }
        if self.buffer_capacity == 0 {
            return Err("buffer_capacity must be > 0".to_string());
        }
        if self.max_line_len == 0 {
            return Err("max_line_len must be > 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        self.persistence.validate()
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ingest_port: 9999,
            query_port: 9998,
            buffer_capacity: 10_000,
            max_line_len: 1024,
            max_connections: 1024,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl PersistenceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_env("COLLECTOR_PERSIST_ENABLED").unwrap_or(defaults.enabled),
            directory: std::env::var("COLLECTOR_PERSIST_DIR").unwrap_or(defaults.directory),
            max_file_size_mb: parse_env("COLLECTOR_PERSIST_MAX_FILE_MB")
                .unwrap_or(defaults.max_file_size_mb),
            queue_depth: parse_env("COLLECTOR_PERSIST_QUEUE_DEPTH")
                .unwrap_or(defaults.queue_depth),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.directory.is_empty() {
                return Err(
                    "persistence.directory must not be empty when persistence is enabled"
                        .to_string(),
                );
            }
            if self.max_file_size_mb == 0 {
                return Err(
                    "persistence.max_file_size_mb must be > 0 when persistence is enabled"
                        .to_string(),
                );
            }
            if self.queue_depth == 0 {
                return Err(
                    "persistence.queue_depth must be > 0 when persistence is enabled".to_string(),
                );
            }
        }
        Ok(())
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "./logs".to_string(),
            max_file_size_mb: 10,
            queue_depth: 8192,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
