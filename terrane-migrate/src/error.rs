//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Database operation error.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Declared schema failed validation; rejected before any diffing.
    #[error("schema validation error: {0}")]
    Validation(#[from] terrane_schema::SchemaError),

    /// Another process held the module's advisory lock past the wait
    /// bound. Retryable: the caller decides retry/backoff policy.
    #[error("could not acquire migration lock for module '{module}' within {waited_ms}ms")]
    LockContention {
        /// Module whose lock was contended.
        module: String,
        /// How long this process waited.
        waited_ms: u64,
    },

    /// A generated DDL statement failed; the whole transaction was rolled
    /// back. Carries the exact statement and module for diagnosis.
    #[error("migration for module '{module}' failed on statement `{statement}`: {source}")]
    DdlExecution {
        /// Module being migrated.
        module: String,
        /// The offending statement.
        statement: String,
        /// Underlying driver error.
        source: tokio_postgres::Error,
    },

    /// Bookkeeping storage could not be read or written where the caller
    /// demanded strict behavior (most read paths degrade instead; see the
    /// storage module).
    #[error("migration bookkeeping unavailable: {0}")]
    StorageUnavailable(String),

    /// Persisted bookkeeping state contradicts itself (e.g. a journal
    /// entry index that is not contiguous).
    #[error("corrupt migration state for module '{module}': {detail}")]
    CorruptState {
        /// Module with inconsistent state.
        module: String,
        /// What was inconsistent.
        detail: String,
    },

    /// General migration error.
    #[error("migration error: {0}")]
    Other(String),
}

impl MigrationError {
    /// Create a storage-unavailable error.
    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the caller can reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. } | Self::Pool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_contention_is_retryable() {
        let err = MigrationError::LockContention {
            module: "blog".to_string(),
            waited_ms: 30_000,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("blog"));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err: MigrationError =
            terrane_schema::SchemaError::DuplicateEnum("status".to_string()).into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("status"));
    }
}
