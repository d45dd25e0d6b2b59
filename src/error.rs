//! Error types for the schema repository

use thiserror::Error;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Schema repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Schema declares no targetNamespace")]
    NoTargetNamespace,

    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    #[error("Schema not found: namespace {namespace} location {location}")]
    NotFound { namespace: String, location: String },

    #[error("Catalog {path} could not be parsed: {reason}")]
    CatalogCorrupt { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing to delete {path}: outside the repository directory")]
    UnsafeDeletePath { path: String },

    #[error("Invalid schema file name: {0:?}")]
    InvalidFileName(String),

    #[error("Repository lock poisoned")]
    LockPoisoned,

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl RepositoryError {
    /// Wrap any parser error as a malformed-schema failure
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        RepositoryError::MalformedSchema(err.to_string())
    }

    /// True for the not-found kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}
