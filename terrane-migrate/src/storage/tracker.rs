//! Migration tracker: which schema hash has been applied per module, plus
//! bootstrap of the engine's own bookkeeping tables.

use tokio_postgres::GenericClient;
use tracing::debug;

use crate::db::{bookkeeping_table, Capabilities, BOOKKEEPING_NAMESPACE};
use crate::error::MigrateResult;
use crate::storage::StorageRead;

/// A recorded, successfully applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Content hash of the applied snapshot.
    pub hash: String,
    /// When the migration was applied, in epoch milliseconds.
    pub applied_at: i64,
}

/// Records applied schema hashes and bootstraps bookkeeping tables.
#[derive(Debug, Clone)]
pub struct MigrationTracker {
    capabilities: Capabilities,
}

impl MigrationTracker {
    /// Create a tracker for the given backend capabilities.
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    fn table(&self) -> String {
        bookkeeping_table(self.capabilities, "_migrations")
    }

    /// Create the bookkeeping namespace and tables. Idempotent; failures
    /// only log, and the engine degrades to the no-prior-state path on
    /// limited backends or first-run races between replicas.
    pub async fn ensure_tables(&self, client: &impl GenericClient) {
        if self.capabilities.supports_namespaces {
            if let Err(err) = client
                .batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {BOOKKEEPING_NAMESPACE}"
                ))
                .await
            {
                debug!(%err, "bookkeeping namespace creation failed; continuing unprefixed semantics");
            }
        }

        for ddl in self.bootstrap_sql() {
            if let Err(err) = client.batch_execute(&ddl).await {
                debug!(%err, ddl, "bookkeeping table creation failed");
            }
        }
    }

    /// DDL for the three bookkeeping tables.
    pub fn bootstrap_sql(&self) -> Vec<String> {
        let migrations = self.table();
        let journal = bookkeeping_table(self.capabilities, "_journal");
        let snapshots = bookkeeping_table(self.capabilities, "_snapshots");
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {migrations} (\n    \
                 id SERIAL PRIMARY KEY,\n    \
                 module_name TEXT NOT NULL,\n    \
                 hash TEXT NOT NULL,\n    \
                 created_at BIGINT NOT NULL,\n    \
                 UNIQUE(module_name, hash)\n)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {journal} (\n    \
                 module_name TEXT PRIMARY KEY,\n    \
                 version TEXT NOT NULL,\n    \
                 dialect TEXT NOT NULL DEFAULT 'postgresql',\n    \
                 entries JSONB NOT NULL DEFAULT '[]'\n)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {snapshots} (\n    \
                 id SERIAL PRIMARY KEY,\n    \
                 module_name TEXT NOT NULL,\n    \
                 idx INTEGER NOT NULL,\n    \
                 snapshot JSONB NOT NULL,\n    \
                 created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),\n    \
                 UNIQUE(module_name, idx)\n)"
            ),
        ]
    }

    /// Latest applied migration for a module, by hash.
    pub async fn last_applied(
        &self,
        client: &impl GenericClient,
        module: &str,
    ) -> StorageRead<MigrationRecord> {
        let sql = format!(
            "SELECT hash, created_at FROM {} WHERE module_name = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
            self.table()
        );
        match client.query_opt(&sql, &[&module]).await {
            Ok(Some(row)) => StorageRead::Found(MigrationRecord {
                hash: row.get("hash"),
                applied_at: row.get("created_at"),
            }),
            Ok(None) => StorageRead::Missing,
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// Whether this exact hash has already been reconciled for a module.
    pub async fn is_applied(
        &self,
        client: &impl GenericClient,
        module: &str,
        hash: &str,
    ) -> StorageRead<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE module_name = $1 AND hash = $2 LIMIT 1",
            self.table()
        );
        match client.query_opt(&sql, &[&module, &hash]).await {
            Ok(row) => StorageRead::Found(row.is_some()),
            Err(err) => StorageRead::Unavailable(err.to_string()),
        }
    }

    /// Record a successfully applied migration. A hash already recorded
    /// for the module (a forced re-run) keeps its original row.
    pub async fn record_applied(
        &self,
        client: &impl GenericClient,
        module: &str,
        hash: &str,
        created_at: i64,
    ) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (module_name, hash, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (module_name, hash) DO NOTHING",
            self.table()
        );
        client.execute(&sql, &[&module, &hash, &created_at]).await?;
        Ok(())
    }

    /// Delete every bookkeeping row for a module, across all three
    /// tables. Development-only: used by `reset`.
    pub async fn clear_module(
        &self,
        client: &impl GenericClient,
        module: &str,
    ) -> MigrateResult<()> {
        for base in ["_migrations", "_journal", "_snapshots"] {
            let sql = format!(
                "DELETE FROM {} WHERE module_name = $1",
                bookkeeping_table(self.capabilities, base)
            );
            client.execute(&sql, &[&module]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_sql_is_namespaced_on_full_backends() {
        let tracker = MigrationTracker::new(Capabilities::postgres());
        let ddl = tracker.bootstrap_sql();
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].contains("migrations._migrations"));
        assert!(ddl[1].contains("migrations._journal"));
        assert!(ddl[2].contains("migrations._snapshots"));
        assert!(ddl[2].contains("UNIQUE(module_name, idx)"));
    }

    #[test]
    fn applied_hashes_are_unique_per_module() {
        let tracker = MigrationTracker::new(Capabilities::postgres());
        let ddl = tracker.bootstrap_sql();
        assert!(ddl[0].contains("UNIQUE(module_name, hash)"));
    }

    #[test]
    fn bootstrap_sql_is_bare_without_namespace_support() {
        let tracker = MigrationTracker::new(Capabilities::minimal());
        for ddl in tracker.bootstrap_sql() {
            assert!(!ddl.contains("migrations."));
            assert!(ddl.contains("CREATE TABLE IF NOT EXISTS _"));
        }
    }
}
