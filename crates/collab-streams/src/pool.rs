//! Redis connection pool using deadpool-redis.
//!
//! One pool per process; blocking stream reads (XREAD/XREADGROUP with BLOCK)
//! hold their pooled connection for the duration of the call, so the pool is
//! sized with a couple of spare connections beyond the reader loops.

use deadpool_redis::{Config, Pool, Runtime};

/// Error type for Redis operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("failed to create Redis pool: {0}")]
    CreatePool(String),

    #[error("failed to get connection from pool: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed stream entry: {0}")]
    Entry(String),
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisPoolError>;

/// Managed Redis connection pool.
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisPool {
    /// Create a new pool for the given URL.
    pub fn new(url: &str, max_connections: usize) -> RedisResult<Self> {
        let cfg = Config::from_url(url);
        let pool = cfg
            .builder()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?
            .max_size(max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?;

        // Redact credentials from URL for logging
        let safe_url = url.split('@').next_back().unwrap_or(url);
        tracing::info!(
            url = %safe_url,
            max_connections = max_connections,
            "Redis pool created"
        );

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> RedisResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(RedisPoolError::GetConnection)
    }

    /// Check that Redis answers a PING. Called once at startup; failure maps
    /// to exit code 2.
    pub async fn health_check(&self) -> RedisResult<()> {
        let mut conn = self.get().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
