use thiserror::Error;

/// Error classes surfaced to catalog readers.
///
/// Values are cloneable because a cached envelope hands the same error to
/// every reader that hits it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("catalog validation failed: {message}")]
    Validation { message: String },
    #[error("catalog conflict: {message}")]
    Conflict { message: String },
    #[error("unknown catalog error")]
    Unknown,
}

impl CatalogError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
