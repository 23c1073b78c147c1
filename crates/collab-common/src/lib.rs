//! # collab-common
//!
//! Cross-cutting concerns for the gateway and worker processes:
//! configuration, the application error taxonomy, tracing setup, the
//! `AuthCheck` contract and the injected metrics sink.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use auth::{
    auth_from_config, AuthCheck, AuthError, Authenticated, JwtAuth, Permission, PermissiveAuth,
};
pub use config::{
    AppConfig, ConfigError, RedisSettings, StorageDriver, StorageSettings, TimingSettings,
};
pub use error::AppError;
pub use metrics::{MetricsSink, NoopMetrics, SharedMetrics};
pub use telemetry::try_init_tracing;
