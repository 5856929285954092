use thiserror::Error;

use crate::config::LoadError;
use crate::domain::error::CatalogError;
use crate::infra::error::InfraError;
use crate::infra::storage::StorageError;

/// Umbrella error for the operator binary and other top-level callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] CatalogError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Stable machine-readable code, logged as `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Domain(CatalogError::NotFound { .. })
            | AppError::Storage(StorageError::NotFound { .. })
            | AppError::NotFound => "not_found",
            AppError::Domain(CatalogError::Validation { .. })
            | AppError::Storage(
                StorageError::Slug(_) | StorageError::InvalidPath | StorageError::Reserved { .. },
            )
            | AppError::Validation(_) => "validation_error",
            AppError::Domain(CatalogError::Conflict { .. })
            | AppError::Storage(StorageError::Conflict { .. }) => "conflict",
            AppError::Config(_) | AppError::Infra(InfraError::Configuration { .. }) => {
                "configuration_error"
            }
            AppError::Infra(InfraError::Snapshot(_)) => "snapshot_error",
            AppError::Infra(InfraError::Telemetry(_)) => "telemetry_error",
            AppError::Infra(InfraError::Io(_)) | AppError::Storage(StorageError::Io(_)) => {
                "io_error"
            }
            AppError::Domain(CatalogError::Unknown) | AppError::Unexpected(_) => {
                "unexpected_error"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_error_class() {
        assert_eq!(
            AppError::from(CatalogError::not_found("project")).code(),
            "not_found"
        );
        assert_eq!(
            AppError::from(StorageError::NotFound {
                kind: "chapter",
                id: 4
            })
            .code(),
            "not_found"
        );
        assert_eq!(
            AppError::from(StorageError::Reserved {
                slug: "tmp".to_string()
            })
            .code(),
            "validation_error"
        );
        assert_eq!(
            AppError::from(InfraError::snapshot("bad toml")).code(),
            "snapshot_error"
        );
        assert_eq!(AppError::unexpected("boom").code(), "unexpected_error");
    }
}
