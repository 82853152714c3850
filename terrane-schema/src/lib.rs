//! # terrane-schema
//!
//! Declared-schema model and schema snapshots for the Terrane runtime
//! migration engine.
//!
//! This crate provides:
//! - A builder-style API for modules to declare their target schema
//!   ([`ModuleSchema`], [`TableDef`], [`ColumnDef`], ...)
//! - The normalized, immutable [`Snapshot`] representation persisted by
//!   the engine
//! - Deterministic content hashing ([`hash_snapshot`]) used for change
//!   detection and migration records
//! - Declaration validation (duplicate names, dangling references)
//!
//! ## Example
//!
//! ```rust
//! use terrane_schema::{ColumnDef, IndexDef, ModuleSchema, TableDef};
//!
//! let schema = ModuleSchema::new("blog")
//!     .table(
//!         TableDef::new("posts")
//!             .column(ColumnDef::new("id", "integer").identity())
//!             .column(ColumnDef::new("title", "text").not_null())
//!             .primary_key(&["id"])
//!             .index(IndexDef::new(&["title"]).unique()),
//!     );
//!
//! let snapshot = schema.snapshot().expect("valid declaration");
//! assert!(snapshot.table("posts").is_some());
//! ```

pub mod declare;
pub mod error;
pub mod hash;
pub mod snapshot;
pub mod validate;

pub use declare::{
    ColumnDef, DEFAULT_NAMESPACE, ForeignKeyDef, IndexDef, ModuleSchema, RenameHints, TableDef,
    derive_namespace,
};
pub use error::{SchemaError, SchemaResult};
pub use hash::{has_changes, hash_snapshot};
pub use snapshot::{
    CheckConstraint, Column, EnumDef, ForeignKey, Index, PrimaryKey, ReferentialAction, Snapshot,
    Table, UniqueConstraint,
};
pub use validate::validate_declaration;
