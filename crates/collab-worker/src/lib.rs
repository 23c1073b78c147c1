//! # collab-worker
//!
//! The durability half of the system. Workers consume the shared dirty-room
//! queue, rebuild each claimed room from its last snapshot plus stream tail,
//! persist a fresh snapshot and trim the stream. Consumer-group exclusivity
//! plus a claim TTL guarantee one compactor per room; idempotent steps make
//! crash recovery a plain re-run.

mod compactor;

pub use compactor::{CompactionOutcome, Compactor, WorkerError};

use collab_api::DocApi;
use collab_common::{AppConfig, AppError, StorageDriver};
use collab_storage::Storage;
use collab_streams::{KeyScheme, RedisPool, RoomStreamClient, WorkerQueue};
use std::sync::Arc;
use uuid::Uuid;

/// Build a compactor from configuration, creating its own storage driver.
pub async fn create_compactor(config: &AppConfig) -> Result<Compactor, AppError> {
    let driver = match config.storage.driver {
        StorageDriver::Memory => "memory",
        StorageDriver::Fs => "fs",
    };
    let storage = collab_storage::from_driver_name(driver, &config.storage.fs_root)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;
    create_compactor_with_storage(config, storage)
}

/// Build a compactor around an externally provided storage driver.
pub fn create_compactor_with_storage(
    config: &AppConfig,
    storage: Arc<dyn Storage>,
) -> Result<Compactor, AppError> {
    let pool = RedisPool::new(&config.redis.url, config.redis.max_connections as usize)
        .map_err(|e| AppError::Config(e.to_string()))?;

    let keys = KeyScheme::new(config.redis.prefix.clone());
    let consumer = format!("worker-{}", Uuid::new_v4());
    let streams = RoomStreamClient::new(pool.clone(), keys.clone(), config.timing.read_block_ms);
    let queue = WorkerQueue::new(
        pool,
        keys.clone(),
        consumer,
        config.timing.worker_block_ms,
        config.timing.worker_timeout_ms,
    );
    let api = Arc::new(DocApi::new(
        storage.clone(),
        streams.clone(),
        queue.clone(),
        config.timing.min_message_lifetime(),
    ));

    Ok(Compactor::new(
        api,
        storage,
        streams,
        queue,
        keys,
        config.timing.min_message_lifetime(),
        collab_common::metrics::noop(),
    ))
}

/// Run a worker process until shutdown.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let compactor = create_compactor(&config).await?;
    compactor
        .queue()
        .ensure_group()
        .await
        .map_err(|e| AppError::Redis(e.to_string()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(signal_shutdown(shutdown_tx));

    compactor.run_until(shutdown_rx).await;
    Ok(())
}

async fn signal_shutdown(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
