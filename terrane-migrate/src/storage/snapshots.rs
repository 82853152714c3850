//! Snapshot store: recorded schema states, one row per migration index.

use terrane_schema::Snapshot;
use tokio_postgres::GenericClient;

use crate::db::{bookkeeping_table, Capabilities};
use crate::error::{MigrateResult, MigrationError};
use crate::storage::StorageRead;

/// Persists and retrieves per-module schema snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    capabilities: Capabilities,
}

impl SnapshotStore {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    fn table(&self) -> String {
        bookkeeping_table(self.capabilities, "_snapshots")
    }

    /// Upsert the snapshot for a module at a given index.
    pub async fn save(
        &self,
        client: &impl GenericClient,
        module: &str,
        idx: i32,
        snapshot: &Snapshot,
    ) -> MigrateResult<()> {
        let value = serde_json::to_value(snapshot)
            .map_err(|e| MigrationError::other(format!("snapshot serialization failed: {e}")))?;
        let sql = format!(
            "INSERT INTO {} (module_name, idx, snapshot) VALUES ($1, $2, $3) \
             ON CONFLICT (module_name, idx) DO UPDATE SET snapshot = EXCLUDED.snapshot",
            self.table()
        );
        client.execute(&sql, &[&module, &idx, &value]).await?;
        Ok(())
    }

    /// Load the snapshot recorded at a specific index.
    pub async fn load(
        &self,
        client: &impl GenericClient,
        module: &str,
        idx: i32,
    ) -> StorageRead<Snapshot> {
        let sql = format!(
            "SELECT snapshot FROM {} WHERE module_name = $1 AND idx = $2",
            self.table()
        );
        match client.query_opt(&sql, &[&module, &idx]).await {
            Ok(Some(row)) => Self::decode(row.get("snapshot")),
            Ok(None) => StorageRead::Missing,
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// Load the most recently recorded snapshot for a module.
    pub async fn latest(&self, client: &impl GenericClient, module: &str) -> StorageRead<Snapshot> {
        let sql = format!(
            "SELECT snapshot FROM {} WHERE module_name = $1 ORDER BY idx DESC LIMIT 1",
            self.table()
        );
        match client.query_opt(&sql, &[&module]).await {
            Ok(Some(row)) => Self::decode(row.get("snapshot")),
            Ok(None) => StorageRead::Missing,
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// All snapshots for a module, ordered by index.
    pub async fn all(
        &self,
        client: &impl GenericClient,
        module: &str,
    ) -> StorageRead<Vec<(i32, Snapshot)>> {
        let sql = format!(
            "SELECT idx, snapshot FROM {} WHERE module_name = $1 ORDER BY idx ASC",
            self.table()
        );
        match client.query(&sql, &[&module]).await {
            Ok(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let idx: i32 = row.get("idx");
                    match Self::decode(row.get("snapshot")) {
                        StorageRead::Found(snapshot) => out.push((idx, snapshot)),
                        StorageRead::Missing => continue,
                        StorageRead::Unavailable(message) => {
                            return StorageRead::Unavailable(message);
                        }
                    }
                }
                StorageRead::Found(out)
            }
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// Number of recorded snapshots for a module.
    pub async fn count(&self, client: &impl GenericClient, module: &str) -> StorageRead<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE module_name = $1",
            self.table()
        );
        match client.query_one(&sql, &[&module]).await {
            Ok(row) => StorageRead::Found(row.get("n")),
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    fn decode(value: serde_json::Value) -> StorageRead<Snapshot> {
        match serde_json::from_value(value) {
            Ok(snapshot) => StorageRead::Found(snapshot),
            Err(err) => StorageRead::Unavailable(format!("stored snapshot corrupt: {err}")),
        }
    }
}
