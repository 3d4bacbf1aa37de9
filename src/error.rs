//! Error kinds surfaced by the lock types.
//!
//! `LockError` is what acquire and release return. `CleanupError` is reported by
//! best-effort cleanup paths and has no conversion into `LockError`,
//! so a cleanup failure cannot be `?`-propagated out of an acquire or release.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = LockError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LockError {
    /// The deadline elapsed, or non-blocking mode found the lock already held.
    #[error("lock timeout: {0}")]
    Timeout(String),

    /// Unexpected platform or backend error.
    #[error("lock failure: {0}")]
    LockFailure(String),
}

impl LockError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::LockFailure(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        Self::LockFailure(format!("redis: {}", err))
    }
}

/// A failure while reclaiming queue or lock artifacts.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("redis cleanup of '{key}': {message}")]
    Redis { key: String, message: String },
}

impl CleanupError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type CleanupResult<T = ()> = std::result::Result<T, CleanupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_kind() {
        let err = LockError::timeout("waited too long");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "lock timeout: waited too long");
    }

    #[test]
    fn test_failure_kind() {
        let err = LockError::failure("unsupported platform");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "lock failure: unsupported platform");
    }

    #[test]
    fn test_cleanup_error_display() {
        let err = CleanupError::io(
            "remove ticket",
            "/tmp/x.lock.queue/1",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "remove ticket /tmp/x.lock.queue/1: denied");
    }
}
