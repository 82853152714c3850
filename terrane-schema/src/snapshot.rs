//! Schema snapshots: the normalized, persisted representation of a
//! module's schema at one point in time.
//!
//! A [`Snapshot`] is immutable once persisted. Every new schema version
//! produces a new snapshot at the next journal index; nothing is edited in
//! place. Entity sets (tables, enums, indexes, constraints) live in
//! `BTreeMap`s so serialization order is canonical, while columns keep
//! their declared order in an `IndexMap` because column order is part of
//! the table's identity.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot format version written into persisted snapshots.
pub const SNAPSHOT_VERSION: &str = "1";

/// The SQL dialect snapshots are normalized against.
pub const SNAPSHOT_DIALECT: &str = "postgresql";

/// A versioned description of one module's owned schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: String,
    /// SQL dialect the snapshot was normalized for.
    pub dialect: String,
    /// The namespace (database schema) the module owns.
    pub namespace: String,
    /// Tables keyed by table name.
    pub tables: BTreeMap<String, Table>,
    /// Enum types keyed by enum name.
    pub enums: BTreeMap<String, EnumDef>,
}

impl Snapshot {
    /// The canonical "nothing exists yet" snapshot used as the baseline
    /// for a module's very first migration.
    pub fn empty(namespace: impl Into<String>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            dialect: SNAPSHOT_DIALECT.to_string(),
            namespace: namespace.into(),
            tables: BTreeMap::new(),
            enums: BTreeMap::new(),
        }
    }

    /// Check whether the snapshot describes no entities at all.
    ///
    /// A module that declares zero tables still produces a valid,
    /// hashable snapshot; this is not an error state.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.enums.is_empty()
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }
}

/// A table within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Table name (unqualified).
    pub name: String,
    /// Namespace the table lives in.
    pub namespace: String,
    /// Columns in declared order.
    pub columns: IndexMap<String, Column>,
    /// Primary key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    /// Secondary indexes keyed by index name.
    #[serde(default)]
    pub indexes: BTreeMap<String, Index>,
    /// Foreign keys keyed by constraint name.
    #[serde(default)]
    pub foreign_keys: BTreeMap<String, ForeignKey>,
    /// Unique constraints keyed by constraint name.
    #[serde(default)]
    pub unique_constraints: BTreeMap<String, UniqueConstraint>,
    /// Check constraints keyed by constraint name.
    #[serde(default)]
    pub check_constraints: BTreeMap<String, CheckConstraint>,
}

impl Table {
    /// Fully qualified `namespace.table` name for DDL.
    pub fn qualified_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.namespace, self.name)
    }
}

/// A single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name.
    pub name: String,
    /// SQL data type as written in DDL (e.g. `integer`, `varchar(255)`).
    pub data_type: String,
    /// Whether the column carries `NOT NULL`.
    pub not_null: bool,
    /// Default value expression, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Whether the column is a generated identity column.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub identity: bool,
    /// Name of the enum type this column references, if its type is an
    /// enum owned by the same module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_ref: Option<String>,
}

/// A primary key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKey {
    /// Constraint name.
    pub name: String,
    /// Columns in key order.
    pub columns: Vec<String>,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Index method (`btree`, `gin`, `hnsw`, ...).
    #[serde(default = "default_index_method")]
    pub method: String,
}

fn default_index_method() -> String {
    "btree".to_string()
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    /// `NO ACTION` (the database default).
    #[default]
    NoAction,
    /// `RESTRICT`.
    Restrict,
    /// `CASCADE`.
    Cascade,
    /// `SET NULL`.
    SetNull,
    /// `SET DEFAULT`.
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling of the action.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Source columns on this table.
    pub columns: Vec<String>,
    /// Referenced table. May be qualified (`other_ns.table`) when the
    /// target lives outside the module's namespace.
    pub ref_table: String,
    /// Referenced columns.
    pub ref_columns: Vec<String>,
    /// `ON DELETE` action.
    #[serde(default)]
    pub on_delete: ReferentialAction,
    /// `ON UPDATE` action.
    #[serde(default)]
    pub on_update: ReferentialAction,
    /// Whether the target table is declared external to this snapshot
    /// (owned by another module), which exempts it from reference
    /// validation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

/// A unique constraint (distinct from a unique index: expressed as a
/// table constraint in DDL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

/// A check constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,
    /// Check expression, verbatim.
    pub expression: String,
}

/// An enum type scoped to the module's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDef {
    /// Enum type name (unqualified).
    pub name: String,
    /// Values in declared order.
    pub values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_is_valid() {
        let snap = Snapshot::empty("public");
        assert!(snap.is_empty());
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.dialect, "postgresql");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snap = Snapshot::empty("app");
        let mut columns = IndexMap::new();
        columns.insert(
            "id".to_string(),
            Column {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                not_null: true,
                default: None,
                identity: true,
                enum_ref: None,
            },
        );
        snap.tables.insert(
            "users".to_string(),
            Table {
                name: "users".to_string(),
                namespace: "app".to_string(),
                columns,
                primary_key: Some(PrimaryKey {
                    name: "users_pkey".to_string(),
                    columns: vec!["id".to_string()],
                }),
                indexes: BTreeMap::new(),
                foreign_keys: BTreeMap::new(),
                unique_constraints: BTreeMap::new(),
                check_constraints: BTreeMap::new(),
            },
        );

        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }

    #[test]
    fn referential_action_sql() {
        assert_eq!(ReferentialAction::Cascade.as_sql(), "CASCADE");
        assert_eq!(ReferentialAction::NoAction.as_sql(), "NO ACTION");
        assert_eq!(ReferentialAction::default(), ReferentialAction::NoAction);
    }

    #[test]
    fn qualified_name_quotes_both_parts() {
        let table = Table {
            name: "posts".to_string(),
            namespace: "blog".to_string(),
            columns: IndexMap::new(),
            primary_key: None,
            indexes: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            unique_constraints: BTreeMap::new(),
            check_constraints: BTreeMap::new(),
        };
        assert_eq!(table.qualified_name(), "\"blog\".\"posts\"");
    }
}
