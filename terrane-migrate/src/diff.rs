//! Snapshot diffing for generating migrations.

use terrane_schema::{
    CheckConstraint, Column, EnumDef, ForeignKey, Index, PrimaryKey, RenameHints, Snapshot, Table,
    UniqueConstraint,
};

/// A diff between two snapshots of the same namespace.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    /// Tables to create, in full.
    pub create_tables: Vec<Table>,
    /// Tables to drop.
    pub drop_tables: Vec<String>,
    /// Tables to rename instead of drop-and-create.
    pub rename_tables: Vec<TableRename>,
    /// Tables to alter in place.
    pub alter_tables: Vec<TableAlterDiff>,
    /// Enum types to create.
    pub create_enums: Vec<EnumDef>,
    /// Enum types to drop.
    pub drop_enums: Vec<String>,
    /// Enum types whose value sets changed.
    pub alter_enums: Vec<EnumAlterDiff>,
}

impl SchemaDiff {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.create_tables.is_empty()
            && self.drop_tables.is_empty()
            && self.rename_tables.is_empty()
            && self.alter_tables.is_empty()
            && self.create_enums.is_empty()
            && self.drop_enums.is_empty()
            && self.alter_enums.is_empty()
    }

    /// Whether the diff would generate any DDL.
    pub fn has_changes(&self) -> bool {
        !self.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.create_tables.is_empty() {
            parts.push(format!("Create {} tables", self.create_tables.len()));
        }
        if !self.drop_tables.is_empty() {
            parts.push(format!("Drop {} tables", self.drop_tables.len()));
        }
        if !self.rename_tables.is_empty() {
            parts.push(format!("Rename {} tables", self.rename_tables.len()));
        }
        if !self.alter_tables.is_empty() {
            parts.push(format!("Alter {} tables", self.alter_tables.len()));
        }
        if !self.create_enums.is_empty() {
            parts.push(format!("Create {} enums", self.create_enums.len()));
        }
        if !self.drop_enums.is_empty() {
            parts.push(format!("Drop {} enums", self.drop_enums.len()));
        }
        if !self.alter_enums.is_empty() {
            parts.push(format!("Alter {} enums", self.alter_enums.len()));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A table rename.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRename {
    /// Name recorded in the previous snapshot.
    pub old_name: String,
    /// Name in the declared schema.
    pub new_name: String,
}

/// In-place alterations to a single table.
#[derive(Debug, Clone, Default)]
pub struct TableAlterDiff {
    /// Table name (post-rename when the table was also renamed).
    pub table: String,
    /// Columns to add.
    pub add_columns: Vec<Column>,
    /// Columns to drop.
    pub drop_columns: Vec<String>,
    /// Columns to rename instead of drop-and-add.
    pub rename_columns: Vec<ColumnRename>,
    /// Columns whose definition changed.
    pub alter_columns: Vec<ColumnAlterDiff>,
    /// Indexes to create.
    pub add_indexes: Vec<Index>,
    /// Indexes to drop.
    pub drop_indexes: Vec<String>,
    /// Foreign keys to add.
    pub add_foreign_keys: Vec<ForeignKey>,
    /// Foreign keys to drop.
    pub drop_foreign_keys: Vec<String>,
    /// Unique constraints to add.
    pub add_unique_constraints: Vec<UniqueConstraint>,
    /// Unique constraints to drop.
    pub drop_unique_constraints: Vec<String>,
    /// Check constraints to add.
    pub add_check_constraints: Vec<CheckConstraint>,
    /// Check constraints to drop.
    pub drop_check_constraints: Vec<String>,
    /// New primary key, when it changed or was added.
    pub set_primary_key: Option<PrimaryKey>,
    /// Name of the primary key constraint to drop first.
    pub drop_primary_key: Option<String>,
}

impl TableAlterDiff {
    fn is_empty(&self) -> bool {
        self.add_columns.is_empty()
            && self.drop_columns.is_empty()
            && self.rename_columns.is_empty()
            && self.alter_columns.is_empty()
            && self.add_indexes.is_empty()
            && self.drop_indexes.is_empty()
            && self.add_foreign_keys.is_empty()
            && self.drop_foreign_keys.is_empty()
            && self.add_unique_constraints.is_empty()
            && self.drop_unique_constraints.is_empty()
            && self.add_check_constraints.is_empty()
            && self.drop_check_constraints.is_empty()
            && self.set_primary_key.is_none()
            && self.drop_primary_key.is_none()
    }
}

/// A column rename within a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRename {
    /// Column name in the previous snapshot.
    pub old_name: String,
    /// Column name in the declared schema.
    pub new_name: String,
}

/// A changed column definition. Fields are `Some` only when that aspect
/// changed; defaults use an explicit flag since `None` is a valid value.
#[derive(Debug, Clone, Default)]
pub struct ColumnAlterDiff {
    /// Column name.
    pub name: String,
    /// Previous data type, if the type changed.
    pub old_type: Option<String>,
    /// New data type, if the type changed.
    pub new_type: Option<String>,
    /// Previous nullability, if it changed.
    pub old_not_null: Option<bool>,
    /// New nullability, if it changed.
    pub new_not_null: Option<bool>,
    /// Whether the default expression changed.
    pub default_changed: bool,
    /// Previous default expression.
    pub old_default: Option<String>,
    /// New default expression.
    pub new_default: Option<String>,
}

impl ColumnAlterDiff {
    /// Whether the column's data type changed.
    pub fn type_changed(&self) -> bool {
        self.new_type.is_some()
    }
}

/// Value-set changes to an enum type.
#[derive(Debug, Clone, Default)]
pub struct EnumAlterDiff {
    /// Enum name.
    pub name: String,
    /// Values to append.
    pub add_values: Vec<String>,
    /// Values no longer declared. Postgres cannot drop enum values in
    /// place, so these force a type rebuild.
    pub remove_values: Vec<String>,
}

/// Compute the diff from a recorded snapshot to the declared one,
/// without rename hints.
pub fn calculate_diff(source: Option<&Snapshot>, target: &Snapshot) -> SchemaDiff {
    calculate_diff_with_hints(source, target, &RenameHints::default())
}

/// Compute the diff, treating hinted old-name/new-name pairs as renames
/// rather than drop-and-create.
pub fn calculate_diff_with_hints(
    source: Option<&Snapshot>,
    target: &Snapshot,
    hints: &RenameHints,
) -> SchemaDiff {
    let mut result = SchemaDiff::default();

    let empty = Snapshot::empty(&target.namespace);
    let source = source.unwrap_or(&empty);

    diff_enums(source, target, &mut result);

    // Resolve table renames first so the remaining comparison sees the
    // renamed table under its new name.
    let mut renames = Vec::new();
    for (new_name, old_name) in &hints.tables {
        if source.tables.contains_key(old_name)
            && !source.tables.contains_key(new_name)
            && target.tables.contains_key(new_name)
        {
            renames.push(TableRename {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            });
        }
    }
    let renamed_source = |name: &str| -> Option<&Table> {
        if let Some(table) = source.tables.get(name) {
            return Some(table);
        }
        renames
            .iter()
            .find(|r| r.new_name == name)
            .and_then(|r| source.tables.get(&r.old_name))
    };

    for (name, target_table) in &target.tables {
        match renamed_source(name) {
            None => result.create_tables.push(target_table.clone()),
            Some(source_table) => {
                let alter = diff_tables(source_table, target_table, hints);
                if !alter.is_empty() {
                    result.alter_tables.push(alter);
                }
            }
        }
    }

    for name in source.tables.keys() {
        let renamed_away = renames.iter().any(|r| &r.old_name == name);
        if !target.tables.contains_key(name) && !renamed_away {
            result.drop_tables.push(name.clone());
        }
    }

    result.rename_tables = renames;
    result
}

fn diff_enums(source: &Snapshot, target: &Snapshot, result: &mut SchemaDiff) {
    for (name, target_enum) in &target.enums {
        match source.enums.get(name) {
            None => result.create_enums.push(target_enum.clone()),
            Some(source_enum) if source_enum.values != target_enum.values => {
                let add_values: Vec<String> = target_enum
                    .values
                    .iter()
                    .filter(|v| !source_enum.values.contains(v))
                    .cloned()
                    .collect();
                let remove_values: Vec<String> = source_enum
                    .values
                    .iter()
                    .filter(|v| !target_enum.values.contains(v))
                    .cloned()
                    .collect();
                result.alter_enums.push(EnumAlterDiff {
                    name: name.clone(),
                    add_values,
                    remove_values,
                });
            }
            Some(_) => {}
        }
    }

    for name in source.enums.keys() {
        if !target.enums.contains_key(name) {
            result.drop_enums.push(name.clone());
        }
    }
}

fn diff_tables(source: &Table, target: &Table, hints: &RenameHints) -> TableAlterDiff {
    let mut alter = TableAlterDiff {
        table: target.name.clone(),
        ..Default::default()
    };

    // Column renames resolve before add/drop detection.
    let mut renames = Vec::new();
    for ((hint_table, new_name), old_name) in &hints.columns {
        if hint_table == &target.name
            && source.columns.contains_key(old_name)
            && !source.columns.contains_key(new_name)
            && target.columns.contains_key(new_name)
        {
            renames.push(ColumnRename {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            });
        }
    }
    let renamed_source_column = |name: &str| -> Option<&Column> {
        if let Some(column) = source.columns.get(name) {
            return Some(column);
        }
        renames
            .iter()
            .find(|r| r.new_name == name)
            .and_then(|r| source.columns.get(&r.old_name))
    };

    for (name, target_column) in &target.columns {
        match renamed_source_column(name) {
            None => alter.add_columns.push(target_column.clone()),
            Some(source_column) => {
                if let Some(change) = diff_columns(source_column, target_column) {
                    alter.alter_columns.push(change);
                }
            }
        }
    }

    for name in source.columns.keys() {
        let renamed_away = renames.iter().any(|r| &r.old_name == name);
        if !target.columns.contains_key(name) && !renamed_away {
            alter.drop_columns.push(name.clone());
        }
    }
    alter.rename_columns = renames;

    match (&source.primary_key, &target.primary_key) {
        (None, Some(new)) => alter.set_primary_key = Some(new.clone()),
        (Some(old), None) => alter.drop_primary_key = Some(old.name.clone()),
        (Some(old), Some(new)) if old != new => {
            alter.drop_primary_key = Some(old.name.clone());
            alter.set_primary_key = Some(new.clone());
        }
        _ => {}
    }

    diff_named(
        &source.indexes,
        &target.indexes,
        &mut alter.add_indexes,
        &mut alter.drop_indexes,
    );
    diff_named(
        &source.foreign_keys,
        &target.foreign_keys,
        &mut alter.add_foreign_keys,
        &mut alter.drop_foreign_keys,
    );
    diff_named(
        &source.unique_constraints,
        &target.unique_constraints,
        &mut alter.add_unique_constraints,
        &mut alter.drop_unique_constraints,
    );
    diff_named(
        &source.check_constraints,
        &target.check_constraints,
        &mut alter.add_check_constraints,
        &mut alter.drop_check_constraints,
    );

    alter
}

/// Diff two name-keyed constraint maps. A changed definition becomes a
/// drop of the old plus an add of the new.
fn diff_named<T: Clone + PartialEq>(
    source: &std::collections::BTreeMap<String, T>,
    target: &std::collections::BTreeMap<String, T>,
    add: &mut Vec<T>,
    drop: &mut Vec<String>,
) {
    for (name, target_item) in target {
        match source.get(name) {
            None => add.push(target_item.clone()),
            Some(source_item) if source_item != target_item => {
                drop.push(name.clone());
                add.push(target_item.clone());
            }
            Some(_) => {}
        }
    }
    for name in source.keys() {
        if !target.contains_key(name) {
            drop.push(name.clone());
        }
    }
}

fn diff_columns(source: &Column, target: &Column) -> Option<ColumnAlterDiff> {
    let type_changed = source.data_type != target.data_type;
    let not_null_changed = source.not_null != target.not_null;
    let default_changed = source.default != target.default;
    // Identity transitions are expressed as a type-level change so the
    // generator rewrites the column attribute.
    let identity_changed = source.identity != target.identity;

    if !type_changed && !not_null_changed && !default_changed && !identity_changed {
        return None;
    }

    Some(ColumnAlterDiff {
        name: target.name.clone(),
        old_type: (type_changed || identity_changed).then(|| source.data_type.clone()),
        new_type: (type_changed || identity_changed).then(|| target.data_type.clone()),
        old_not_null: not_null_changed.then_some(source.not_null),
        new_not_null: not_null_changed.then_some(target.not_null),
        default_changed,
        old_default: source.default.clone(),
        new_default: target.default.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use terrane_schema::{ColumnDef, ModuleSchema, TableDef};

    fn module_with(tables: Vec<TableDef>) -> ModuleSchema {
        let mut module = ModuleSchema::new("core");
        for table in tables {
            module = module.table(table);
        }
        module
    }

    fn users_table() -> TableDef {
        TableDef::new("users")
            .column(ColumnDef::new("id", "uuid").not_null())
            .column(ColumnDef::new("email", "text").not_null())
            .primary_key(&["id"])
    }

    #[test]
    fn identical_snapshots_produce_empty_diff() {
        let snapshot = module_with(vec![users_table()]).snapshot().unwrap();
        let diff = calculate_diff(Some(&snapshot), &snapshot);
        assert!(diff.is_empty());
        assert_eq!(diff.summary(), "No changes");
    }

    #[test]
    fn missing_baseline_creates_everything() {
        let snapshot = module_with(vec![users_table()]).snapshot().unwrap();
        let diff = calculate_diff(None, &snapshot);
        assert_eq!(diff.create_tables.len(), 1);
        assert_eq!(diff.create_tables[0].name, "users");
        assert!(diff.drop_tables.is_empty());
    }

    #[test]
    fn added_column_is_additive() {
        let before = module_with(vec![users_table()]).snapshot().unwrap();
        let after = module_with(vec![
            users_table().column(ColumnDef::new("created_at", "timestamptz")),
        ])
        .snapshot()
        .unwrap();

        let diff = calculate_diff(Some(&before), &after);
        assert!(diff.create_tables.is_empty());
        assert_eq!(diff.alter_tables.len(), 1);
        assert_eq!(diff.alter_tables[0].add_columns.len(), 1);
        assert_eq!(diff.alter_tables[0].add_columns[0].name, "created_at");
        assert!(diff.alter_tables[0].drop_columns.is_empty());
    }

    #[test]
    fn removed_table_is_a_drop() {
        let before = module_with(vec![users_table(), TableDef::new("legacy")])
            .snapshot()
            .unwrap();
        let after = module_with(vec![users_table()]).snapshot().unwrap();

        let diff = calculate_diff(Some(&before), &after);
        assert_eq!(diff.drop_tables, vec!["legacy".to_string()]);
    }

    #[test]
    fn hinted_table_rename_is_not_a_drop() {
        let before = module_with(vec![TableDef::new("accounts")
            .column(ColumnDef::new("id", "uuid").not_null())
            .primary_key(&["id"])])
        .snapshot()
        .unwrap();

        let module = module_with(vec![TableDef::new("users")
            .renamed_from("accounts")
            .column(ColumnDef::new("id", "uuid").not_null())
            .primary_key(&["id"])]);
        let hints = module.rename_hints();
        let after = module.snapshot().unwrap();

        let diff = calculate_diff_with_hints(Some(&before), &after, &hints);
        assert!(diff.drop_tables.is_empty());
        assert!(diff.create_tables.is_empty());
        assert_eq!(
            diff.rename_tables,
            vec![TableRename {
                old_name: "accounts".to_string(),
                new_name: "users".to_string(),
            }]
        );
        // Primary key name follows the table name, so the rename also
        // carries a constraint adjustment.
        assert_eq!(diff.alter_tables.len(), 1);
    }

    #[test]
    fn hinted_column_rename_is_not_a_drop() {
        let before = module_with(vec![TableDef::new("users")
            .column(ColumnDef::new("id", "uuid").not_null())
            .column(ColumnDef::new("mail", "text"))
            .primary_key(&["id"])])
        .snapshot()
        .unwrap();

        let module = module_with(vec![TableDef::new("users")
            .column(ColumnDef::new("id", "uuid").not_null())
            .column(ColumnDef::new("email", "text").renamed_from("mail"))
            .primary_key(&["id"])]);
        let hints = module.rename_hints();
        let after = module.snapshot().unwrap();

        let diff = calculate_diff_with_hints(Some(&before), &after, &hints);
        assert_eq!(diff.alter_tables.len(), 1);
        let alter = &diff.alter_tables[0];
        assert!(alter.drop_columns.is_empty());
        assert!(alter.add_columns.is_empty());
        assert_eq!(
            alter.rename_columns,
            vec![ColumnRename {
                old_name: "mail".to_string(),
                new_name: "email".to_string(),
            }]
        );
    }

    #[test]
    fn type_change_is_reported_with_both_sides() {
        let before = module_with(vec![TableDef::new("events")
            .column(ColumnDef::new("count", "integer").not_null())])
        .snapshot()
        .unwrap();
        let after = module_with(vec![TableDef::new("events")
            .column(ColumnDef::new("count", "bigint").not_null())])
        .snapshot()
        .unwrap();

        let diff = calculate_diff(Some(&before), &after);
        let alter = &diff.alter_tables[0];
        assert_eq!(alter.alter_columns.len(), 1);
        assert_eq!(alter.alter_columns[0].old_type.as_deref(), Some("integer"));
        assert_eq!(alter.alter_columns[0].new_type.as_deref(), Some("bigint"));
    }

    #[test]
    fn enum_value_addition_and_removal() {
        let before = module_with(vec![]).enum_type("status", ["active", "retired"]);
        let after = module_with(vec![]).enum_type("status", ["active", "archived"]);

        let diff = calculate_diff(
            Some(&before.snapshot().unwrap()),
            &after.snapshot().unwrap(),
        );
        assert_eq!(diff.alter_enums.len(), 1);
        assert_eq!(diff.alter_enums[0].add_values, vec!["archived".to_string()]);
        assert_eq!(
            diff.alter_enums[0].remove_values,
            vec!["retired".to_string()]
        );
    }

    #[test]
    fn nullability_tightening_is_an_alter() {
        let before = module_with(vec![
            TableDef::new("users").column(ColumnDef::new("email", "text")),
        ])
        .snapshot()
        .unwrap();
        let after = module_with(vec![
            TableDef::new("users").column(ColumnDef::new("email", "text").not_null()),
        ])
        .snapshot()
        .unwrap();

        let diff = calculate_diff(Some(&before), &after);
        let change = &diff.alter_tables[0].alter_columns[0];
        assert_eq!(change.old_not_null, Some(false));
        assert_eq!(change.new_not_null, Some(true));
        assert!(!change.type_changed());
    }
}
