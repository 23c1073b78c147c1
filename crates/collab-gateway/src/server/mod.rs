//! Gateway server setup
//!
//! Builds the axum application, wires the dependency graph (storage ->
//! streams -> api -> subscription -> sessions) and runs it.

mod handler;
mod state;

pub use handler::sync_handler;
pub use state::GatewayState;

use crate::connection::ConnectionManager;
use crate::subscription::RoomSubscriber;
use axum::{routing::get, Router};
use collab_api::DocApi;
use collab_common::{auth_from_config, AppConfig, AppError, StorageDriver};
use collab_storage::Storage;
use collab_streams::{KeyScheme, RedisPool, RoomStreamClient, WorkerQueue};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Create the gateway router.
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/{room}", get(sync_handler))
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application.
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize all dependencies and create the gateway state, building the
/// storage driver from configuration.
pub async fn create_gateway_state(config: AppConfig) -> Result<GatewayState, AppError> {
    let driver = match config.storage.driver {
        StorageDriver::Memory => "memory",
        StorageDriver::Fs => "fs",
    };
    let storage = collab_storage::from_driver_name(driver, &config.storage.fs_root)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;
    create_gateway_state_with_storage(config, storage).await
}

/// Initialize dependencies around an externally provided storage driver.
/// Test harnesses use this to share one storage instance between a gateway
/// and a worker.
pub async fn create_gateway_state_with_storage(
    config: AppConfig,
    storage: Arc<dyn Storage>,
) -> Result<GatewayState, AppError> {
    tracing::info!("connecting to Redis...");
    let pool = RedisPool::new(&config.redis.url, config.redis.max_connections as usize)
        .map_err(|e| AppError::Config(e.to_string()))?;
    pool.health_check()
        .await
        .map_err(|e| AppError::Redis(e.to_string()))?;
    tracing::info!("Redis connection established");

    let keys = KeyScheme::new(config.redis.prefix.clone());
    let streams = RoomStreamClient::new(pool.clone(), keys.clone(), config.timing.read_block_ms);
    let queue = WorkerQueue::new(
        pool,
        keys,
        format!("gateway-{}", Uuid::new_v4()),
        config.timing.worker_block_ms,
        config.timing.worker_timeout_ms,
    );

    let api = Arc::new(DocApi::new(
        storage,
        streams,
        queue,
        config.timing.min_message_lifetime(),
    ));

    let auth = auth_from_config(config.auth_public_key.as_deref())
        .map_err(|e| AppError::Config(e.to_string()))?;

    let manager = ConnectionManager::new_shared();
    let subscriber = RoomSubscriber::new(manager.clone(), api.clone(), collab_common::metrics::noop());
    subscriber.start();

    Ok(GatewayState::new(api, manager, subscriber, auth, config))
}

/// Run the gateway server on `addr` until shutdown.
pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Config(format!("failed to bind to {addr}: {e}")))?;

    tracing::info!("gateway listening on ws://{}/{{room}}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
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
}

/// Run the complete gateway server with configuration.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = create_gateway_state(config).await?;
    let app = create_app(state);
    run_server(app, addr).await
}
