//! Configuration
//!
//! Loaded from environment variables (with `.env` support in development).

mod app_config;

pub use app_config::{
    AppConfig, ConfigError, RedisSettings, StorageDriver, StorageSettings, TimingSettings,
};
