//! # terrane-migrate
//!
//! Runtime schema-migration engine for modular applications sharing one
//! PostgreSQL database.
//!
//! Each module declares the schema it wants (see `terrane-schema`) and
//! owns a namespace derived from its name. At startup the engine:
//! - loads the module's last recorded snapshot from bookkeeping (or
//!   introspects a pre-existing database that has no bookkeeping yet)
//! - diffs it against the declared snapshot
//! - generates ordered PostgreSQL DDL for the difference
//! - blocks destructive changes until explicitly confirmed
//! - applies the DDL in a transaction under a per-module advisory lock,
//!   then records the new snapshot, journal entry, and schema hash
//!
//! ```text
//! ┌───────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ ModuleSchema  │────▶│ Snapshot     │────▶│ Diff        │
//! └───────────────┘     └──────────────┘     └─────────────┘
//!                              ▲                    │
//!                       ┌──────────────┐            ▼
//!                       │ Bookkeeping /│     ┌─────────────┐
//!                       │ Introspection│     │ DDL + Gate  │
//!                       └──────────────┘     └─────────────┘
//!                              ▲                    │
//!                              └────── record ◀─────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use terrane_migrate::{MigrateOptions, MigrationOutcome, MigratorDb, RuntimeMigrator};
//! use terrane_schema::{ColumnDef, ModuleSchema, TableDef};
//!
//! async fn migrate_blog(pool: deadpool_postgres::Pool) -> terrane_migrate::MigrateResult<()> {
//!     let schema = ModuleSchema::new("blog").table(
//!         TableDef::new("posts")
//!             .column(ColumnDef::new("id", "uuid").not_null())
//!             .column(ColumnDef::new("title", "text").not_null())
//!             .primary_key(&["id"]),
//!     );
//!
//!     let migrator = RuntimeMigrator::new(MigratorDb::new(pool));
//!     match migrator.migrate(&schema, &MigrateOptions::default()).await? {
//!         MigrationOutcome::Applied { tag, .. } => println!("applied {tag}"),
//!         MigrationOutcome::NoOp { .. } => println!("up to date"),
//!         MigrationOutcome::Blocked(check) => {
//!             eprintln!("destructive changes need confirmation: {:?}", check.warnings);
//!         }
//!         MigrationOutcome::DryRun { .. } => unreachable!(),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Concurrency: replicas calling `migrate` for the same module serialize
//! on an advisory lock keyed by the module name; whichever arrives second
//! finds the hash already recorded and no-ops. Different modules migrate
//! in parallel.

pub mod db;
pub mod diff;
pub mod error;
pub mod introspect;
pub mod lock;
pub mod migrator;
pub mod provision;
pub mod safety;
pub mod sql;
pub mod storage;

// Re-exports
pub use db::{bookkeeping_table, Capabilities, MigratorDb, BOOKKEEPING_NAMESPACE};
pub use diff::{
    calculate_diff, calculate_diff_with_hints, ColumnAlterDiff, ColumnRename, EnumAlterDiff,
    SchemaDiff, TableAlterDiff, TableRename,
};
pub use error::{MigrateResult, MigrationError};
pub use introspect::DatabaseIntrospector;
pub use lock::{lock_key_for_module, AdvisoryLock};
pub use migrator::{
    MigrateOptions, MigrationOutcome, MigrationPlan, MigrationStatus, RuntimeMigrator,
    DEFAULT_LOCK_WAIT,
};
pub use provision::Provisioner;
pub use safety::{check_for_data_loss, DataLossCheck, TypeChange};
pub use sql::PostgresSqlGenerator;
pub use storage::{
    Journal, JournalEntry, JournalStore, MigrationRecord, MigrationTracker, SnapshotStore,
    StorageRead, JOURNAL_VERSION,
};
