//! Error types for cache operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache driver `{driver}` does not support tag scoping")]
    TagsUnsupported { driver: String },
    #[error("unsupported cache driver `{driver}`")]
    UnsupportedDriver { driver: String },
    #[error("cache policy lookup failed: {0}")]
    Policy(String),
    #[error("corrupt cache entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn tags_unsupported(driver: impl Into<String>) -> Self {
        Self::TagsUnsupported {
            driver: driver.into(),
        }
    }

    pub fn unsupported_driver(driver: impl Into<String>) -> Self {
        Self::UnsupportedDriver {
            driver: driver.into(),
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mentions_path() {
        let err = CacheError::io(
            "/tmp/fragcache/entries/abc.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("abc.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn tags_unsupported_names_driver() {
        let err = CacheError::tags_unsupported("file");
        assert_eq!(
            err.to_string(),
            "cache driver `file` does not support tag scoping"
        );
    }

    #[test]
    fn serialization_error_converts() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = CacheError::from(source);
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
