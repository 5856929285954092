//! Failures of the runtime around the catalog: files, logging, settings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cannot start telemetry: {0}")]
    Telemetry(String),
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
    #[error("unreadable catalog snapshot: {0}")]
    Snapshot(String),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot(message.into())
    }
}
