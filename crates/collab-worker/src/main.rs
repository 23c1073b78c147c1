//! Compaction worker entry point
//!
//! Run with:
//! ```bash
//! cargo run -p collab-worker --bin worker
//! ```
//!
//! Any number of worker processes may run against the same Redis; the
//! consumer group hands each room to exactly one of them. Exit codes: 0 on
//! clean shutdown, 1 on configuration errors, 2 when Redis is unreachable
//! at startup.

use collab_common::{try_init_tracing, AppConfig, AppError};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "worker failed");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), AppError> {
    info!("starting collab worker...");

    let config = AppConfig::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        AppError::from(e)
    })?;

    if !config.timing.check_claim_margin() {
        warn!(
            worker_timeout_ms = config.timing.worker_timeout_ms,
            min_message_lifetime_ms = config.timing.min_message_lifetime_ms,
            "claim TTL does not exceed the drain interval, concurrent compactions may race"
        );
    }

    info!(
        prefix = %config.redis.prefix,
        storage = ?config.storage.driver,
        "configuration loaded"
    );

    collab_worker::run(config).await
}
