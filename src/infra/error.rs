use thiserror::Error;

use crate::cache::CacheError;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("configuration error: {0}")]
    Configuration(#[from] LoadError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("invalid input: {message}")]
    Input { message: String },
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }
}
