//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PondoError {
    /// The backing medium could not be reached. Retryable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Stored content exists but does not parse as a funds document.
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// A submitted document failed validation at `field`.
    #[error("Invalid document at `{field}`: {reason}")]
    InvalidDocument { field: String, reason: String },

    /// The stored version moved since it was last read.
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: String, found: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid admin key")]
    InvalidCredential,

    #[error("Too many login attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PondoError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDocument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for PondoError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for PondoError {
    fn from(e: reqwest::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PondoError>;
