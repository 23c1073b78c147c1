//! Application configuration structs
//!
//! Loads configuration from environment variables.

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration, shared by the `server` and `worker`
/// entry points.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub redis: RedisSettings,
    pub storage: StorageSettings,
    pub timing: TimingSettings,
    /// RS256 public key (PEM) for token verification. When absent, auth is
    /// permissive and logged as such at startup.
    pub auth_public_key: Option<String>,
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
}

/// Snapshot storage driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Memory,
    Fs,
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_storage_driver")]
    pub driver: StorageDriver,
    #[serde(default = "default_fs_root")]
    pub fs_root: String,
}

/// Stream and worker timing knobs, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingSettings {
    /// How long a stream entry must exist before a worker may compact past
    /// it, and the TTL of the in-memory "recently queued" dedup entry.
    #[serde(default = "default_min_message_lifetime_ms")]
    pub min_message_lifetime_ms: u64,
    /// Claim TTL on worker tasks; stale claims are reclaimed by peers.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
    /// Block cap on the gateway's XREAD cycle.
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
    /// Block cap on the worker's XREADGROUP call.
    #[serde(default = "default_worker_block_ms")]
    pub worker_block_ms: u64,
}

impl TimingSettings {
    pub fn min_message_lifetime(&self) -> Duration {
        Duration::from_millis(self.min_message_lifetime_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    /// The claim TTL must comfortably exceed the drain interval, otherwise
    /// two workers can race the same compaction. Only warns; the operator
    /// may know better.
    pub fn check_claim_margin(&self) -> bool {
        self.worker_timeout_ms > self.min_message_lifetime_ms
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            min_message_lifetime_ms: default_min_message_lifetime_ms(),
            worker_timeout_ms: default_worker_timeout_ms(),
            read_block_ms: default_read_block_ms(),
            worker_block_ms: default_worker_block_ms(),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

// Default value functions

fn default_port() -> u16 {
    8765
}

fn default_redis_prefix() -> String {
    "y".to_string()
}

fn default_redis_max_connections() -> u32 {
    16
}

fn default_storage_driver() -> StorageDriver {
    StorageDriver::Memory
}

fn default_fs_root() -> String {
    "./data".to_string()
}

fn default_min_message_lifetime_ms() -> u64 {
    60_000
}

fn default_worker_timeout_ms() -> u64 {
    120_000
}

fn default_read_block_ms() -> u64 {
    1_000
}

fn default_worker_block_ms() -> u64 {
    1_000
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if `REDIS_URL` is missing or any value fails to
    /// parse; the binaries exit with code 1 on that.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let driver = match env::var("STORAGE") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "memory" => StorageDriver::Memory,
                "fs" => StorageDriver::Fs,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "STORAGE",
                        value: raw,
                    })
                }
            },
            Err(_) => default_storage_driver(),
        };

        Ok(Self {
            port: parse_var("PORT", default_port())?,
            redis: RedisSettings {
                url: env::var("REDIS_URL").map_err(|_| ConfigError::MissingVar("REDIS_URL"))?,
                prefix: env::var("REDIS_PREFIX").unwrap_or_else(|_| default_redis_prefix()),
                max_connections: parse_var(
                    "REDIS_MAX_CONNECTIONS",
                    default_redis_max_connections(),
                )?,
            },
            storage: StorageSettings {
                driver,
                fs_root: env::var("STORAGE_FS_ROOT").unwrap_or_else(|_| default_fs_root()),
            },
            timing: TimingSettings {
                min_message_lifetime_ms: parse_var(
                    "REDIS_MIN_MESSAGE_LIFETIME_MS",
                    default_min_message_lifetime_ms(),
                )?,
                worker_timeout_ms: parse_var(
                    "REDIS_WORKER_TIMEOUT_MS",
                    default_worker_timeout_ms(),
                )?,
                read_block_ms: parse_var("READ_BLOCK_MS", default_read_block_ms())?,
                worker_block_ms: parse_var("WORKER_BLOCK_MS", default_worker_block_ms())?,
            },
            auth_public_key: env::var("AUTH_PUBLIC_KEY").ok(),
        })
    }

    /// A configuration suitable for embedding in tests: memory storage,
    /// permissive auth, fast timing.
    #[must_use]
    pub fn for_tests(redis_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            port: 0,
            redis: RedisSettings {
                url: redis_url.into(),
                prefix: prefix.into(),
                max_connections: 4,
            },
            storage: StorageSettings {
                driver: StorageDriver::Memory,
                fs_root: default_fs_root(),
            },
            timing: TimingSettings {
                min_message_lifetime_ms: 300,
                worker_timeout_ms: 1_000,
                read_block_ms: 100,
                worker_block_ms: 100,
            },
            auth_public_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert_eq!(default_port(), 8765);
        assert_eq!(default_redis_prefix(), "y");
        assert_eq!(default_storage_driver(), StorageDriver::Memory);
        let timing = TimingSettings::default();
        assert!(timing.check_claim_margin());
        assert_eq!(timing.read_block_ms, 1_000);
    }

    #[test]
    fn claim_margin_flags_inverted_timing() {
        let timing = TimingSettings {
            min_message_lifetime_ms: 10_000,
            worker_timeout_ms: 5_000,
            ..TimingSettings::default()
        };
        assert!(!timing.check_claim_margin());
    }

    #[test]
    fn test_config_is_fast() {
        let config = AppConfig::for_tests("redis://127.0.0.1:6379", "t");
        assert_eq!(config.storage.driver, StorageDriver::Memory);
        assert!(config.timing.min_message_lifetime() < Duration::from_secs(1));
        assert!(config.auth_public_key.is_none());
    }
}
