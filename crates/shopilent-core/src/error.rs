//! Error types shared by every Shopilent crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T, E = ShopilentError> = std::result::Result<T, E>;

/// Coarse error category, safe to expose to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Unauthorized,
    Forbidden,
    Failure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Failure => "failure",
        }
    }

    /// HTTP status code for this category.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Failure => 500,
        }
    }
}

/// Errors produced by domain operations, stores and the webhook pipeline.
#[derive(Debug, Error)]
pub enum ShopilentError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Optimistic concurrency check failed; the caller should reload and retry.
    #[error("{entity} {id} was modified concurrently (expected version {expected})")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    /// An idempotency key was already recorded by another writer.
    #[error("event {0} has already been processed")]
    DuplicateEvent(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

impl ShopilentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ShopilentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ShopilentError::Validation(message.into())
    }

    pub fn concurrency(entity: &'static str, id: impl ToString, expected: i64) -> Self {
        ShopilentError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
            expected,
        }
    }

    pub fn failure(message: impl std::fmt::Display) -> Self {
        ShopilentError::Failure(anyhow::anyhow!("{message}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ShopilentError::NotFound { .. } => ErrorKind::NotFound,
            ShopilentError::Validation(_) => ErrorKind::Validation,
            ShopilentError::Conflict(_)
            | ShopilentError::ConcurrencyConflict { .. }
            | ShopilentError::DuplicateEvent(_) => ErrorKind::Conflict,
            ShopilentError::Unauthorized(_) => ErrorKind::Unauthorized,
            ShopilentError::Forbidden(_) => ErrorKind::Forbidden,
            ShopilentError::Failure(_) => ErrorKind::Failure,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, ShopilentError::ConcurrencyConflict { .. })
    }

    /// Message that is safe to return to an API caller.
    ///
    /// Failures are reduced to a generic text; details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ShopilentError::Failure(_) => "an unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}
