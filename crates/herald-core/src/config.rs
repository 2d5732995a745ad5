//! Configuration resolution for Herald.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, else `<config dir>/herald/server.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default upload limit, matching the largest release binaries we accept.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1_500_000_000;

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    /// Directory where attachments and uploaded release files are written.
    pub upload_dir: PathBuf,
    /// URL path prefix under which `upload_dir` is served.
    pub public_upload_prefix: String,
    /// Maximum notifications kept per application before the oldest are purged.
    pub retention_limit: u32,
    /// Per-subscriber queue depth of the live stream hub.
    pub subscriber_queue_capacity: usize,
    pub max_upload_bytes: usize,
    pub keep_alive_secs: u64,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: None,
            upload_dir: PathBuf::from("uploads"),
            public_upload_prefix: "/uploads".to_string(),
            retention_limit: 200,
            subscriber_queue_capacity: 256,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            keep_alive_secs: 15,
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retention_limit == 0 {
            return Err(Error::Config("retention_limit must be at least 1".into()));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(Error::Config(
                "subscriber_queue_capacity must be at least 1".into(),
            ));
        }
        if !self.public_upload_prefix.starts_with('/')
            || self.public_upload_prefix.trim_end_matches('/').is_empty()
        {
            return Err(Error::Config(format!(
                "public_upload_prefix must be an absolute path below '/': {}",
                self.public_upload_prefix
            )));
        }
        Ok(())
    }

    /// Resolved database path: explicit setting, else the platform data dir.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("herald").join("herald.db"))
            .ok_or_else(|| Error::Config("Cannot determine data directory".into()))
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `config_file` must exist; the default location is optional.
pub fn load_config(config_file: Option<&Path>) -> Result<ServerConfig> {
    let mut config = match config_file {
        Some(path) => load_config_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => ServerConfig::default(),
        },
    };

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Get the default config file path.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("herald").join("server.json"))
}

fn load_config_file(path: &Path) -> Result<ServerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "Loaded config file");
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut ServerConfig) {
    if let Ok(val) = std::env::var("HERALD_RETENTION_LIMIT")
        && let Ok(n) = val.parse()
    {
        config.retention_limit = n;
    }
    if let Ok(val) = std::env::var("HERALD_SUBSCRIBER_QUEUE_CAPACITY")
        && let Ok(n) = val.parse()
    {
        config.subscriber_queue_capacity = n;
    }
    if let Ok(val) = std::env::var("HERALD_UPLOAD_DIR") {
        config.upload_dir = PathBuf::from(val);
    }
}
