//! Content hashing for snapshots.
//!
//! The hash is the engine's change-detection key: two snapshots with the
//! same entities hash identically regardless of construction order,
//! because entity sets serialize from sorted maps. Column order is
//! deliberately hash-relevant since it is preserved through an ordered
//! map.

use sha2::{Digest, Sha256};

use crate::snapshot::Snapshot;

/// Compute the deterministic content hash of a snapshot.
///
/// The hash is computed over the canonical JSON serialization and
/// returned as lowercase hex. It doubles as the migration-record key: a
/// recorded hash equal to the declared schema's hash means the schema has
/// already been reconciled.
pub fn hash_snapshot(snapshot: &Snapshot) -> String {
    // BTreeMap-backed sets make the serialization canonical; a failure
    // here would mean a non-serializable snapshot, which the type system
    // rules out.
    let canonical =
        serde_json::to_vec(snapshot).unwrap_or_else(|_| snapshot.namespace.clone().into_bytes());
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

impl Snapshot {
    /// The deterministic content hash of this snapshot.
    pub fn content_hash(&self) -> String {
        hash_snapshot(self)
    }
}

/// Compare a previous (possibly absent) snapshot against the current one
/// by content hash.
pub fn has_changes(previous: Option<&Snapshot>, current: &Snapshot) -> bool {
    match previous {
        None => !current.is_empty(),
        Some(prev) => hash_snapshot(prev) != hash_snapshot(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Column, Table};
    use indexmap::IndexMap;
    use std::collections::BTreeMap;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            not_null: false,
            default: None,
            identity: false,
            enum_ref: None,
        }
    }

    fn table_with_columns(name: &str, cols: &[(&str, &str)]) -> Table {
        let mut columns = IndexMap::new();
        for (col, ty) in cols {
            columns.insert(col.to_string(), column(col, ty));
        }
        Table {
            name: name.to_string(),
            namespace: "app".to_string(),
            columns,
            primary_key: None,
            indexes: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            unique_constraints: BTreeMap::new(),
            check_constraints: BTreeMap::new(),
        }
    }

    #[test]
    fn hash_is_stable() {
        let snap = Snapshot::empty("public");
        assert_eq!(hash_snapshot(&snap), hash_snapshot(&snap.clone()));
    }

    #[test]
    fn hash_ignores_table_insertion_order() {
        let mut a = Snapshot::empty("app");
        a.tables
            .insert("users".into(), table_with_columns("users", &[("id", "integer")]));
        a.tables
            .insert("posts".into(), table_with_columns("posts", &[("id", "integer")]));

        let mut b = Snapshot::empty("app");
        b.tables
            .insert("posts".into(), table_with_columns("posts", &[("id", "integer")]));
        b.tables
            .insert("users".into(), table_with_columns("users", &[("id", "integer")]));

        assert_eq!(hash_snapshot(&a), hash_snapshot(&b));
    }

    #[test]
    fn hash_is_sensitive_to_column_order() {
        let mut a = Snapshot::empty("app");
        a.tables.insert(
            "users".into(),
            table_with_columns("users", &[("id", "integer"), ("email", "text")]),
        );

        let mut b = Snapshot::empty("app");
        b.tables.insert(
            "users".into(),
            table_with_columns("users", &[("email", "text"), ("id", "integer")]),
        );

        assert_ne!(hash_snapshot(&a), hash_snapshot(&b));
    }

    #[test]
    fn has_changes_against_none_baseline() {
        let empty = Snapshot::empty("app");
        assert!(!has_changes(None, &empty));

        let mut populated = Snapshot::empty("app");
        populated
            .tables
            .insert("users".into(), table_with_columns("users", &[("id", "integer")]));
        assert!(has_changes(None, &populated));
        assert!(!has_changes(Some(&populated), &populated.clone()));
    }
}
