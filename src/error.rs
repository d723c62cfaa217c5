//! Error types for Strata

use crate::types::{EntityId, Tier};
use thiserror::Error;

/// Main error type for the consolidation engine
#[derive(Error, Debug)]
pub enum StrataError {
    /// The tier store cannot be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Insert collided with an existing key
    #[error("Record {entity_id} already exists in tier {tier}")]
    AlreadyExists { tier: Tier, entity_id: EntityId },

    /// Malformed or incomplete record
    #[error("Validation error: {0}")]
    Validation(String),

    /// A component a stage depends on could not be obtained
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Errors that end a stage invocation rather than a single candidate
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            StrataError::StoreUnavailable(_) | StrataError::DependencyUnavailable(_)
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StrataError::AlreadyExists { .. })
    }
}

impl From<sqlx::Error> for StrataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StrataError::StoreUnavailable(err.to_string())
            }
            other => StrataError::Database(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StrataError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StrataError::Database(err.into())
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StrataError>;
