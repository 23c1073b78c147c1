//! Application error type
//!
//! Unified error surface for the process entry points. Library crates keep
//! their own `thiserror` enums; this type exists so `main` can map failures
//! to exit codes and log them uniformly.

use crate::config::ConfigError;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    /// Process exit code for this error: 1 for configuration problems,
    /// 2 when Redis is unreachable at startup, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Redis(_) => 2,
            _ => 1,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(AppError::Config("missing".into()).exit_code(), 1);
        assert_eq!(AppError::Redis("refused".into()).exit_code(), 2);
        assert_eq!(AppError::Storage("io".into()).exit_code(), 1);
    }
}
