//! Durable, per-module bookkeeping storage.
//!
//! Three stores back the engine: the migration tracker (applied hashes),
//! the journal store (ordered migration events), and the snapshot store
//! (numbered schema snapshots). All live in the reserved `migrations`
//! namespace on backends that support namespacing, or unprefixed
//! otherwise.
//!
//! Reads degrade deliberately: a bookkeeping read failure must never
//! block an otherwise-valid migration from a cold database, so read
//! operations return a [`StorageRead`] that distinguishes "no history"
//! from "storage errored" instead of raising.

mod journal;
mod snapshots;
mod tracker;

pub use journal::{Journal, JournalEntry, JournalStore, JOURNAL_VERSION};
pub use snapshots::SnapshotStore;
pub use tracker::{MigrationRecord, MigrationTracker};

use tracing::warn;

use crate::error::{MigrateResult, MigrationError};

/// Outcome of a bookkeeping read.
///
/// `Unavailable` keeps the original degrade-to-empty behavior visible as
/// a typed outcome rather than a swallowed catch-all: callers that only
/// care about "is there prior state" collapse it with
/// [`StorageRead::into_option`], while strict callers convert it into an
/// error with [`StorageRead::required`].
#[derive(Debug)]
pub enum StorageRead<T> {
    /// The record exists.
    Found(T),
    /// Storage is reachable but holds no record.
    Missing,
    /// Storage could not be queried (tables absent, first-run race,
    /// limited backend). Carries the underlying error message.
    Unavailable(String),
}

impl<T> StorageRead<T> {
    /// Collapse to an `Option`, logging the degraded case.
    pub fn into_option(self, context: &str) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Missing => None,
            Self::Unavailable(message) => {
                warn!(context, message, "bookkeeping read degraded to no prior state");
                None
            }
        }
    }

    /// Convert to a strict result: `Unavailable` becomes an error.
    pub fn required(self, context: &str) -> MigrateResult<Option<T>> {
        match self {
            Self::Found(value) => Ok(Some(value)),
            Self::Missing => Ok(None),
            Self::Unavailable(message) => Err(MigrationError::storage_unavailable(format!(
                "{context}: {message}"
            ))),
        }
    }

    /// Whether the read hit the degraded path.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Map the found value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StorageRead<U> {
        match self {
            Self::Found(value) => StorageRead::Found(f(value)),
            Self::Missing => StorageRead::Missing,
            Self::Unavailable(message) => StorageRead::Unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_option_distinguishes_nothing_from_errors() {
        assert_eq!(StorageRead::Found(1).into_option("test"), Some(1));
        assert_eq!(StorageRead::<i32>::Missing.into_option("test"), None);
        assert_eq!(
            StorageRead::<i32>::Unavailable("relation does not exist".into()).into_option("test"),
            None
        );
    }

    #[test]
    fn required_surfaces_unavailability() {
        assert!(StorageRead::Found(1).required("ctx").unwrap().is_some());
        assert!(StorageRead::<i32>::Missing.required("ctx").unwrap().is_none());
        let err = StorageRead::<i32>::Unavailable("boom".into())
            .required("loading journal")
            .unwrap_err();
        assert!(matches!(err, MigrationError::StorageUnavailable(_)));
        assert!(err.to_string().contains("loading journal"));
    }

    #[test]
    fn map_preserves_variant() {
        assert!(matches!(
            StorageRead::Found(2).map(|v| v * 2),
            StorageRead::Found(4)
        ));
        assert!(StorageRead::<i32>::Unavailable("x".into())
            .map(|v| v)
            .is_unavailable());
    }
}
