//! Journal store: the append-only, per-module log of migration events.

use serde::{Deserialize, Serialize};
use tokio_postgres::GenericClient;
use tracing::debug;

use crate::db::{bookkeeping_table, Capabilities};
use crate::error::{MigrateResult, MigrationError};
use crate::storage::StorageRead;

/// Engine journal-format version written into new journals and entries.
pub const JOURNAL_VERSION: &str = "1";

/// A module's migration journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Journal format version.
    pub version: String,
    /// SQL dialect the journal's migrations target.
    pub dialect: String,
    /// Ordered entries; `idx` values are contiguous from 0.
    pub entries: Vec<JournalEntry>,
}

impl Journal {
    /// A fresh journal with no entries.
    pub fn new() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            dialect: "postgresql".to_string(),
            entries: Vec::new(),
        }
    }

    /// Index the next entry must carry.
    pub fn next_idx(&self) -> i32 {
        self.entries.last().map(|e| e.idx + 1).unwrap_or(0)
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

/// One migration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic index, contiguous from 0.
    pub idx: i32,
    /// Engine version that produced the entry.
    pub version: String,
    /// Applied-at timestamp, epoch milliseconds.
    pub when: i64,
    /// Human-readable tag (`NNNN_<hash prefix>`).
    pub tag: String,
    /// Whether destructive statements were permitted for this migration.
    /// Persisted under the journal's historical field name.
    #[serde(rename = "breakpoints")]
    pub allows_destructive: bool,
}

/// Loads and appends per-module journals.
#[derive(Debug, Clone)]
pub struct JournalStore {
    capabilities: Capabilities,
}

impl JournalStore {
    /// Create a journal store for the given backend capabilities.
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    fn table(&self) -> String {
        bookkeeping_table(self.capabilities, "_journal")
    }

    /// Load a module's journal.
    pub async fn load(&self, client: &impl GenericClient, module: &str) -> StorageRead<Journal> {
        let sql = format!(
            "SELECT version, dialect, entries FROM {} WHERE module_name = $1",
            self.table()
        );
        match client.query_opt(&sql, &[&module]).await {
            Ok(Some(row)) => {
                let entries_json: serde_json::Value = row.get("entries");
                match serde_json::from_value(entries_json) {
                    Ok(entries) => StorageRead::Found(Journal {
                        version: row.get("version"),
                        dialect: row.get("dialect"),
                        entries,
                    }),
                    Err(err) => StorageRead::Unavailable(format!("journal entries corrupt: {err}")),
                }
            }
            Ok(None) => StorageRead::Missing,
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// Upsert a module's journal.
    pub async fn save(
        &self,
        client: &impl GenericClient,
        module: &str,
        journal: &Journal,
    ) -> MigrateResult<()> {
        let entries = serde_json::to_value(&journal.entries)
            .map_err(|e| MigrationError::other(format!("journal serialization failed: {e}")))?;
        let sql = format!(
            "INSERT INTO {} (module_name, version, dialect, entries) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (module_name) DO UPDATE SET \
             version = EXCLUDED.version, \
             dialect = EXCLUDED.dialect, \
             entries = EXCLUDED.entries",
            self.table()
        );
        client
            .execute(&sql, &[&module, &journal.version, &journal.dialect, &entries])
            .await?;
        Ok(())
    }

    /// Append an entry, enforcing index contiguity.
    pub async fn append_entry(
        &self,
        client: &impl GenericClient,
        module: &str,
        entry: JournalEntry,
    ) -> MigrateResult<()> {
        let mut journal = match self.load(client, module).await {
            StorageRead::Found(journal) => journal,
            StorageRead::Missing => Journal::new(),
            StorageRead::Unavailable(message) => {
                return Err(MigrationError::storage_unavailable(format!(
                    "loading journal for '{module}': {message}"
                )));
            }
        };

        let expected = journal.next_idx();
        if entry.idx != expected {
            return Err(MigrationError::CorruptState {
                module: module.to_string(),
                detail: format!(
                    "journal entry idx {} does not follow {} contiguously",
                    entry.idx, expected
                ),
            });
        }

        journal.entries.push(entry);
        self.save(client, module, &journal).await
    }

    /// Index of the next migration for a module: 0 when no journal
    /// exists or when bookkeeping cannot be read (degraded path).
    pub async fn next_idx(&self, client: &impl GenericClient, module: &str) -> i32 {
        match self.load(client, module).await {
            StorageRead::Found(journal) => journal.next_idx(),
            StorageRead::Missing => 0,
            StorageRead::Unavailable(message) => {
                debug!(module, message, "journal unavailable, treating next idx as 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(idx: i32) -> JournalEntry {
        JournalEntry {
            idx,
            version: JOURNAL_VERSION.to_string(),
            when: 1_700_000_000_000 + idx as i64,
            tag: format!("{idx:04}_abcdef0123"),
            allows_destructive: false,
        }
    }

    #[test]
    fn next_idx_starts_at_zero() {
        let journal = Journal::new();
        assert_eq!(journal.next_idx(), 0);
    }

    #[test]
    fn next_idx_follows_last_entry() {
        let mut journal = Journal::new();
        journal.entries.push(entry(0));
        journal.entries.push(entry(1));
        assert_eq!(journal.next_idx(), 2);
    }

    #[test]
    fn entry_serializes_with_historical_field_name() {
        let json = serde_json::to_value(entry(3)).unwrap();
        assert_eq!(json["idx"], 3);
        assert!(json["breakpoints"].is_boolean());
        assert!(json.get("allows_destructive").is_none());

        let back: JournalEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry(3));
    }
}
