//! The runtime migration engine.
//!
//! `RuntimeMigrator` ties the pieces together: it validates a module's
//! declared schema, loads the recorded snapshot (or introspects a live
//! database that predates bookkeeping), diffs, gates destructive changes,
//! and applies the generated DDL exactly once under the module's advisory
//! lock.

use std::time::Duration;

use chrono::Utc;
use terrane_schema::{hash_snapshot, ModuleSchema, Snapshot};
use tokio_postgres::Client;
use tracing::{debug, info, warn};

use crate::db::MigratorDb;
use crate::diff::calculate_diff_with_hints;
use crate::error::{MigrateResult, MigrationError};
use crate::introspect::DatabaseIntrospector;
use crate::lock::AdvisoryLock;
use crate::provision::Provisioner;
use crate::safety::{check_for_data_loss, DataLossCheck};
use crate::sql::PostgresSqlGenerator;
use crate::storage::{
    Journal, JournalEntry, JournalStore, MigrationRecord, MigrationTracker, SnapshotStore,
    StorageRead, JOURNAL_VERSION,
};

/// Default bound on how long `migrate` waits for a contended lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Per-call knobs for [`RuntimeMigrator::migrate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Log every applied statement at info level.
    pub verbose: bool,
    /// Re-run even when the exact schema hash is already recorded.
    pub force: bool,
    /// Compute and return the DDL without executing anything.
    pub dry_run: bool,
    /// Confirm destructive changes flagged by the data-loss check.
    pub allow_data_loss: bool,
}

impl MigrateOptions {
    /// Whether destructive statements may run. Only the explicit
    /// data-loss confirmation unlocks them; `force` re-runs a recorded
    /// hash but never waives the gate.
    pub fn confirms_data_loss(&self) -> bool {
        self.allow_data_loss
    }

    /// Whether this call may write bookkeeping. Dry runs compute DDL but
    /// never write, baseline adoption included.
    pub fn writes_bookkeeping(&self) -> bool {
        !self.dry_run
    }
}

/// What a `migrate` call did.
#[derive(Debug, Clone)]
pub enum MigrationOutcome {
    /// DDL was executed and recorded.
    Applied {
        /// Statements that ran, in order.
        statements: Vec<String>,
        /// Hash of the now-current snapshot.
        hash: String,
        /// Journal tag of the new entry.
        tag: String,
    },
    /// The declared schema already matches the recorded state.
    NoOp {
        /// Hash of the declared snapshot.
        hash: String,
    },
    /// Dry run: the DDL that would execute.
    DryRun {
        /// Statements that would run, in order.
        statements: Vec<String>,
    },
    /// Destructive changes were detected and not confirmed. Nothing ran.
    Blocked(DataLossCheck),
}

/// A computed-but-unapplied migration, from [`RuntimeMigrator::check_migration`].
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Statements the migration would run, in order.
    pub statements: Vec<String>,
    /// Destructive-change scan of the diff.
    pub data_loss: DataLossCheck,
    /// Hash of the declared snapshot.
    pub hash: String,
}

/// Bookkeeping view of a module, from [`RuntimeMigrator::status`].
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Whether any migration has ever been recorded for the module.
    pub has_run: bool,
    /// Latest applied migration, if recorded.
    pub last_migration: Option<MigrationRecord>,
    /// The module's journal, if one exists.
    pub journal: Option<Journal>,
    /// Number of recorded snapshots.
    pub snapshot_count: i64,
}

/// The migration engine. Cheap to clone; all state lives in the database.
#[derive(Clone)]
pub struct RuntimeMigrator {
    db: MigratorDb,
    tracker: MigrationTracker,
    journal: JournalStore,
    snapshots: SnapshotStore,
    lock_wait: Duration,
}

impl RuntimeMigrator {
    /// Create an engine over the given database handle.
    pub fn new(db: MigratorDb) -> Self {
        let capabilities = db.capabilities();
        Self {
            db,
            tracker: MigrationTracker::new(capabilities),
            journal: JournalStore::new(capabilities),
            snapshots: SnapshotStore::new(capabilities),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Override the bounded lock wait.
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Create the engine's bookkeeping tables if missing. Called by
    /// `migrate` as well; standalone use is for eager startup checks.
    pub async fn initialize(&self) -> MigrateResult<()> {
        let conn = self.db.get().await?;
        let client: &Client = &conn;
        self.tracker.ensure_tables(client).await;
        Ok(())
    }

    /// Reconcile a module's declared schema with the database.
    pub async fn migrate(
        &self,
        schema: &ModuleSchema,
        options: &MigrateOptions,
    ) -> MigrateResult<MigrationOutcome> {
        let module = schema.module();
        let target = schema.snapshot()?;
        let hash = hash_snapshot(&target);

        self.initialize().await?;

        // Dry runs read but never write, so they skip the lock.
        let lock = if self.db.capabilities().supports_advisory_locks && options.writes_bookkeeping()
        {
            Some(AdvisoryLock::acquire(&self.db, module, self.lock_wait).await?)
        } else {
            None
        };

        let result = self.migrate_locked(schema, &target, &hash, options).await;

        if let Some(lock) = lock {
            lock.release().await;
        }
        result
    }

    async fn migrate_locked(
        &self,
        schema: &ModuleSchema,
        target: &Snapshot,
        hash: &str,
        options: &MigrateOptions,
    ) -> MigrateResult<MigrationOutcome> {
        let module = schema.module();
        let mut conn = self.db.get().await?;
        let client: &Client = &conn;

        if !options.force
            && let StorageRead::Found(true) = self.tracker.is_applied(client, module, hash).await
        {
            debug!(module, hash, "schema hash already applied");
            return Ok(MigrationOutcome::NoOp {
                hash: hash.to_string(),
            });
        }

        let source = self.load_source(client, schema).await?;
        let hints = schema.rename_hints();
        let diff = calculate_diff_with_hints(source.as_ref(), target, &hints);

        if diff.is_empty() {
            if options.writes_bookkeeping() {
                self.record_baseline_if_needed(client, module, target, hash)
                    .await;
            }
            debug!(module, "no schema changes");
            return Ok(MigrationOutcome::NoOp {
                hash: hash.to_string(),
            });
        }
        info!(module, summary = %diff.summary(), "schema changes detected");

        let check = check_for_data_loss(&diff);
        for warning in &check.warnings {
            warn!(module, "{warning}");
        }
        if check.requires_confirmation && !options.confirms_data_loss() {
            warn!(module, "destructive migration blocked pending confirmation");
            return Ok(MigrationOutcome::Blocked(check));
        }

        let generator = PostgresSqlGenerator::new(schema.namespace_name());
        let statements = generator.generate(&diff, target);

        if options.dry_run {
            return Ok(MigrationOutcome::DryRun { statements });
        }

        let provisioner = Provisioner::new(self.db.capabilities());
        provisioner
            .ensure_namespace(client, schema.namespace_name())
            .await?;
        provisioner
            .install_extensions(client, schema.required_extensions())
            .await;

        let idx = self.journal.next_idx(client, module).await;
        let tag = format!("{idx:04}_{}", &hash[..10]);
        let when = Utc::now().timestamp_millis();
        let entry = JournalEntry {
            idx,
            version: JOURNAL_VERSION.to_string(),
            when,
            tag: tag.clone(),
            allows_destructive: options.confirms_data_loss(),
        };

        if self.db.capabilities().supports_transactional_ddl {
            let tx = conn.transaction().await?;
            let tx_client: &tokio_postgres::Transaction<'_> = &tx;
            for statement in &statements {
                self.apply_statement(tx_client, module, statement, options)
                    .await?;
            }
            self.journal.append_entry(tx_client, module, entry).await?;
            self.snapshots.save(tx_client, module, idx, target).await?;
            self.tracker
                .record_applied(tx_client, module, hash, when)
                .await?;
            tx.commit().await?;
        } else {
            for statement in &statements {
                self.apply_statement(client, module, statement, options)
                    .await?;
            }
            // The DDL already ran and cannot roll back here; failed
            // bookkeeping only logs.
            if let Err(err) = self.journal.append_entry(client, module, entry).await {
                warn!(module, %err, "journal write failed after migration");
            }
            if let Err(err) = self.snapshots.save(client, module, idx, target).await {
                warn!(module, %err, "snapshot write failed after migration");
            }
            if let Err(err) = self.tracker.record_applied(client, module, hash, when).await {
                warn!(module, %err, "tracker write failed after migration");
            }
        }

        info!(module, tag = %tag, statements = statements.len(), "migration applied");
        Ok(MigrationOutcome::Applied {
            statements,
            hash: hash.to_string(),
            tag,
        })
    }

    async fn apply_statement(
        &self,
        client: &impl tokio_postgres::GenericClient,
        module: &str,
        statement: &str,
        options: &MigrateOptions,
    ) -> MigrateResult<()> {
        if options.verbose {
            info!(module, statement, "applying");
        } else {
            debug!(module, statement, "applying");
        }
        client
            .batch_execute(statement)
            .await
            .map_err(|source| MigrationError::DdlExecution {
                module: module.to_string(),
                statement: statement.to_string(),
                source,
            })
    }

    /// Resolve the migration baseline: the recorded snapshot when one
    /// exists, otherwise an introspection of the live namespace when the
    /// module already owns tables, otherwise nothing.
    async fn load_source(
        &self,
        client: &Client,
        schema: &ModuleSchema,
    ) -> MigrateResult<Option<Snapshot>> {
        let module = schema.module();
        match self.snapshots.latest(client, module).await {
            StorageRead::Found(snapshot) => Ok(Some(snapshot)),
            read => {
                if read.is_unavailable() {
                    debug!(module, "snapshot store unreadable, falling back to introspection");
                }
                let introspector = DatabaseIntrospector::new(schema.namespace_name());
                if introspector
                    .has_existing_tables(client)
                    .await
                    .unwrap_or(false)
                {
                    info!(
                        module,
                        namespace = schema.namespace_name(),
                        "no recorded snapshot for existing tables, introspecting"
                    );
                    Ok(Some(introspector.introspect(client).await?))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// An adopted database can match the declaration exactly without any
    /// recorded history; record the current state so later runs diff
    /// against bookkeeping instead of re-introspecting.
    async fn record_baseline_if_needed(
        &self,
        client: &Client,
        module: &str,
        target: &Snapshot,
        hash: &str,
    ) {
        let has_record = match self.tracker.last_applied(client, module).await {
            StorageRead::Found(_) => true,
            StorageRead::Missing => false,
            StorageRead::Unavailable(_) => return,
        };
        if has_record {
            return;
        }

        let idx = self.journal.next_idx(client, module).await;
        let when = Utc::now().timestamp_millis();
        let entry = JournalEntry {
            idx,
            version: JOURNAL_VERSION.to_string(),
            when,
            tag: format!("{idx:04}_{}", &hash[..10]),
            allows_destructive: false,
        };
        if let Err(err) = self.journal.append_entry(client, module, entry).await {
            warn!(module, %err, "baseline journal write failed");
            return;
        }
        if let Err(err) = self.snapshots.save(client, module, idx, target).await {
            warn!(module, %err, "baseline snapshot write failed");
        }
        if let Err(err) = self.tracker.record_applied(client, module, hash, when).await {
            warn!(module, %err, "baseline tracker write failed");
        }
        debug!(module, "recorded baseline for matching schema");
    }

    /// Compute the migration a `migrate` call would run, without locking
    /// or executing. `None` when the schema already matches.
    pub async fn check_migration(
        &self,
        schema: &ModuleSchema,
    ) -> MigrateResult<Option<MigrationPlan>> {
        let target = schema.snapshot()?;
        let hash = hash_snapshot(&target);
        let conn = self.db.get().await?;
        let client: &Client = &conn;

        let source = self.load_source(client, schema).await?;
        let hints = schema.rename_hints();
        let diff = calculate_diff_with_hints(source.as_ref(), &target, &hints);
        if diff.is_empty() {
            return Ok(None);
        }

        let generator = PostgresSqlGenerator::new(schema.namespace_name());
        Ok(Some(MigrationPlan {
            statements: generator.generate(&diff, &target),
            data_loss: check_for_data_loss(&diff),
            hash,
        }))
    }

    /// Bookkeeping view of a module.
    pub async fn status(&self, module: &str) -> MigrateResult<MigrationStatus> {
        let conn = self.db.get().await?;
        let client: &Client = &conn;

        let journal = self
            .journal
            .load(client, module)
            .await
            .into_option("loading journal for status");
        let last_migration = self
            .tracker
            .last_applied(client, module)
            .await
            .into_option("loading last migration for status");
        let snapshot_count = match self.snapshots.count(client, module).await {
            StorageRead::Found(count) => count,
            _ => 0,
        };

        Ok(MigrationStatus {
            has_run: journal
                .as_ref()
                .is_some_and(|journal| !journal.entries.is_empty()),
            last_migration,
            journal,
            snapshot_count,
        })
    }

    /// Delete all bookkeeping for a module, so the next `migrate` starts
    /// from introspection. Does not touch the module's own tables.
    /// Intended for development databases.
    pub async fn reset(&self, module: &str) -> MigrateResult<()> {
        let lock = if self.db.capabilities().supports_advisory_locks {
            Some(AdvisoryLock::acquire(&self.db, module, self.lock_wait).await?)
        } else {
            None
        };

        let result = async {
            let conn = self.db.get().await?;
            let client: &Client = &conn;
            self.tracker.clear_module(client, module).await?;
            info!(module, "migration bookkeeping cleared");
            Ok(())
        }
        .await;

        if let Some(lock) = lock {
            lock.release().await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_default_to_safe_behavior() {
        let options = MigrateOptions::default();
        assert!(!options.verbose);
        assert!(!options.force);
        assert!(!options.dry_run);
        assert!(!options.allow_data_loss);
    }

    #[test]
    fn force_does_not_confirm_destructive_changes() {
        let forced = MigrateOptions {
            force: true,
            ..Default::default()
        };
        assert!(!forced.confirms_data_loss());

        let confirmed = MigrateOptions {
            allow_data_loss: true,
            ..Default::default()
        };
        assert!(confirmed.confirms_data_loss());
    }

    #[test]
    fn dry_runs_never_write_bookkeeping() {
        let dry = MigrateOptions {
            dry_run: true,
            ..Default::default()
        };
        assert!(!dry.writes_bookkeeping());
        assert!(MigrateOptions::default().writes_bookkeeping());
    }

    #[test]
    fn journal_tags_are_indexed_hash_prefixes() {
        let hash = "3f2a9c1d8e47b6a05c13d2e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4";
        let tag = format!("{:04}_{}", 7, &hash[..10]);
        assert_eq!(tag, "0007_3f2a9c1d8e");
    }
}
