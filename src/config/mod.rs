//! Node configuration, loaded from environment variables with
//! validated defaults.

mod error;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scribe_buffer::BufferConfig;
use scribe_cluster::InstanceInfo;
use scribe_core::constants::DEFAULT_FLUSH_INTERVAL_MS;
use scribe_core::constants::DEFAULT_FLUSH_THRESHOLD;
use uuid::Uuid;

pub use error::ConfigError;

/// Parse an environment value, reporting the offending key and value
/// on failure.
fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: error.to_string(),
    })
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Identity and listen address of this instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable id used for sequencing, routing and registration.
    pub instance_id: String,
    /// Host advertised to clients and peers.
    pub host: String,
    /// Listen port for HTTP and WebSocket traffic.
    pub port: u16,
}

impl NodeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let instance_id = match std::env::var("SCRIBE_INSTANCE_ID") {
            Ok(id) if !id.trim().is_empty() => id,
            Ok(id) => {
                return Err(ConfigError::InvalidValue {
                    key: "SCRIBE_INSTANCE_ID".to_string(),
                    value: id,
                    reason: "instance id must not be blank".to_string(),
                });
            }
            Err(_) => format!("editor-{}", &Uuid::new_v4().simple().to_string()[..8]),
        };
        Ok(Self {
            instance_id,
            host: env_or("SCRIBE_HOST", "127.0.0.1".to_string())?,
            port: env_or("SCRIBE_PORT", 8080u16)?,
        })
    }

    pub fn instance_info(&self) -> InstanceInfo {
        InstanceInfo::new(&self.instance_id, &self.host, self.port)
    }
}

/// Operation buffer tuning.
#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub flush_threshold: usize,
    pub flush_interval_ms: u64,
}

impl BufferSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Self {
            flush_threshold: env_or("SCRIBE_FLUSH_THRESHOLD", DEFAULT_FLUSH_THRESHOLD)?,
            flush_interval_ms: env_or("SCRIBE_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS)?,
        };
        if settings.flush_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCRIBE_FLUSH_THRESHOLD".to_string(),
                value: "0".to_string(),
                reason: "flush threshold must be positive".to_string(),
            });
        }
        if settings.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCRIBE_FLUSH_INTERVAL_MS".to_string(),
                value: "0".to_string(),
                reason: "flush interval must be positive".to_string(),
            });
        }
        Ok(settings)
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::new(
            self.flush_threshold,
            Duration::from_millis(self.flush_interval_ms),
        )
    }
}

/// Durable storage location. Absent means in-memory storage, used by
/// tests and throwaway single-node runs.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            data_dir: std::env::var("SCRIBE_DATA_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub buffer: BufferSettings,
    pub storage: StorageSettings,
}

impl AppConfig {
    /// Load and validate the full configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            node: NodeConfig::load()?,
            buffer: BufferSettings::load()?,
            storage: StorageSettings::load()?,
        })
    }
}
