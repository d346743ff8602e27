//! Configuration types for kumo
//!
//! The on-disk format is a flat JSON document. Sub-configs are flattened so
//! `{"host": ..., "connections": ..., "temp": ..., "download": ...}` maps
//! straight onto [`Config`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// NNTP server configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname
    #[serde(default)]
    pub host: String,

    /// Server port (typically 119 for unencrypted, 563 for TLS)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use TLS (implicit TLS, not STARTTLS)
    #[serde(default, alias = "ssl", alias = "SSL")]
    pub tls: bool,

    /// Username for authentication (no AUTHINFO exchange when absent)
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Number of sessions in the pool (default: 4)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Per-command timeout (default: 60s)
    #[serde(
        default = "default_command_timeout",
        with = "duration_serde",
        alias = "timeout"
    )]
    pub command_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            tls: false,
            username: None,
            password: None,
            connections: default_connections(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// Retrieval behavior (directories, filters, failure policy)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir", alias = "download")]
    pub download_dir: PathBuf,

    /// Temporary directory (default: "./temp")
    #[serde(default = "default_temp_dir", alias = "temp")]
    pub temp_dir: PathBuf,

    /// Subject exclusion patterns; entries whose subject matches any are dropped
    #[serde(default)]
    pub filters: Vec<String>,

    /// Extension of repair-data entries deferred to a second pass
    #[serde(default = "default_repair_extension")]
    pub repair_extension: String,

    /// Treat a failed GROUP as a fragment failure instead of fetching anyway
    #[serde(default)]
    pub strict_group_selection: bool,

    /// Exclude parts whose CRC does not match from reassembly
    ///
    /// When false, mismatched parts are still written and joined and only the
    /// run is flagged broken.
    #[serde(default)]
    pub discard_corrupt_parts: bool,

    /// Capacity of each bounded stage queue (default: 64)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            filters: Vec::new(),
            repair_extension: default_repair_extension(),
            strict_group_selection: false,
            discard_corrupt_parts: false,
            queue_depth: default_queue_depth(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// NNTP server and session pool settings
    #[serde(flatten)]
    pub server: ServerConfig,

    /// Retrieval behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Hide the status line
    #[serde(default)]
    pub quiet: bool,

    /// Emit debug-level logs
    #[serde(default)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[serde(default)]
    pub debug_file: Option<PathBuf>,
}

impl Config {
    /// Parse a JSON configuration document
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| Error::Config {
            message: format!("cannot open {}: {}", path.display(), e),
            key: None,
        })?;
        let config = Self::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings the pipeline cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::config("host", "server host must not be empty"));
        }
        if self.server.connections == 0 {
            return Err(Error::config("connections", "must be at least 1"));
        }
        if self.download.queue_depth == 0 {
            return Err(Error::config("queue_depth", "must be at least 1"));
        }
        if self.server.password.is_some() && self.server.username.is_none() {
            return Err(Error::config(
                "username",
                "password given without a username",
            ));
        }
        Ok(())
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }
}

fn default_port() -> u16 {
    119
}

fn default_connections() -> usize {
    4
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_repair_extension() -> String {
    ".par2".to_string()
}

fn default_queue_depth() -> usize {
    64
}

/// Durations are written as whole seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
