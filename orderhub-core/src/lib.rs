pub mod memory;
pub mod repository;
pub mod validation;

pub use repository::{CacheError, OrderCache, OrderStore, StoreError};

/// Failure kinds surfaced by the order service to its callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: field '{field}': {reason}")]
    ValidationError { field: String, reason: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The offending field path for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationError { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
