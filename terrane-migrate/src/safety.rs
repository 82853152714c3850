//! Destructive-change detection for a computed diff.
//!
//! Anything that can discard stored data must be surfaced before DDL
//! runs, so callers can require an explicit opt-in.

use crate::diff::{ColumnAlterDiff, SchemaDiff};

/// A column type change flagged as potentially lossy.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeChange {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Recorded type.
    pub old_type: String,
    /// Declared type.
    pub new_type: String,
}

/// Outcome of scanning a diff for destructive operations.
#[derive(Debug, Clone, Default)]
pub struct DataLossCheck {
    /// Whether any operation can discard stored data.
    pub has_data_loss: bool,
    /// Tables the migration would drop.
    pub tables_to_remove: Vec<String>,
    /// Columns the migration would drop, as `table.column`.
    pub columns_to_remove: Vec<String>,
    /// Tables whose rows would be discarded by a rebuild.
    pub tables_to_truncate: Vec<String>,
    /// Column type changes that cannot be proven lossless.
    pub type_changes: Vec<TypeChange>,
    /// Human-readable notes, including non-blocking ones.
    pub warnings: Vec<String>,
    /// Whether the migration must be explicitly confirmed.
    pub requires_confirmation: bool,
}

/// Scan a diff for operations that can lose data.
pub fn check_for_data_loss(diff: &SchemaDiff) -> DataLossCheck {
    let mut check = DataLossCheck::default();

    for table in &diff.drop_tables {
        check.tables_to_remove.push(table.clone());
        check
            .warnings
            .push(format!("table '{table}' will be dropped with all its rows"));
    }

    for alter in &diff.alter_tables {
        for column in &alter.drop_columns {
            check
                .columns_to_remove
                .push(format!("{}.{}", alter.table, column));
            check.warnings.push(format!(
                "column '{}.{}' will be dropped with its data",
                alter.table, column
            ));
        }

        for change in &alter.alter_columns {
            if let (Some(old), Some(new)) = (&change.old_type, &change.new_type)
                && !is_lossless_type_change(old, new)
            {
                check.type_changes.push(TypeChange {
                    table: alter.table.clone(),
                    column: change.name.clone(),
                    old_type: old.clone(),
                    new_type: new.clone(),
                });
                // A non-lossless conversion rewrites every row of the
                // table, one entry per table regardless of column count.
                if !check.tables_to_truncate.contains(&alter.table) {
                    check.tables_to_truncate.push(alter.table.clone());
                }
                check.warnings.push(format!(
                    "column '{}.{}' changes type from {} to {}, values may not convert",
                    alter.table, change.name, old, new
                ));
            }
            note_nullability_tightening(alter.table.as_str(), change, &mut check);
        }

        for column in &alter.add_columns {
            if column.not_null && column.default.is_none() && !column.identity {
                check.warnings.push(format!(
                    "adding NOT NULL column '{}.{}' without a default fails on non-empty tables",
                    alter.table, column.name
                ));
            }
        }
    }

    for alter in &diff.alter_enums {
        if !alter.remove_values.is_empty() {
            check.warnings.push(format!(
                "enum '{}' removes values [{}], rows using them block the rebuild",
                alter.name,
                alter.remove_values.join(", ")
            ));
            check.has_data_loss = true;
        }
    }

    if !check.tables_to_remove.is_empty()
        || !check.columns_to_remove.is_empty()
        || !check.tables_to_truncate.is_empty()
        || !check.type_changes.is_empty()
    {
        check.has_data_loss = true;
    }
    check.requires_confirmation = check.has_data_loss;
    check
}

fn note_nullability_tightening(table: &str, change: &ColumnAlterDiff, check: &mut DataLossCheck) {
    if change.old_not_null == Some(false) && change.new_not_null == Some(true) {
        check.warnings.push(format!(
            "column '{}.{}' becomes NOT NULL, existing NULLs block the migration",
            table, change.name
        ));
    }
}

/// Whether a column type change is provably lossless for existing values.
fn is_lossless_type_change(old: &str, new: &str) -> bool {
    if old == new {
        return true;
    }

    // Integer widenings.
    match (old, new) {
        ("smallint", "integer") | ("smallint", "bigint") | ("integer", "bigint") => return true,
        ("real", "double precision") => return true,
        _ => {}
    }

    // Anything textual fits in text.
    if new == "text" && (old.starts_with("varchar") || old.starts_with("char") || old == "text") {
        return true;
    }

    // varchar(n) to varchar(m) with m >= n, or to unbounded varchar.
    if let (Some(old_len), Some(new_len)) = (varchar_len(old), varchar_len(new)) {
        return match (old_len, new_len) {
            (_, None) => true,
            (Some(o), Some(n)) => n >= o,
            (None, Some(_)) => false,
        };
    }

    false
}

/// Parse `varchar` / `varchar(n)`, returning the bound when present.
fn varchar_len(ty: &str) -> Option<Option<u32>> {
    let rest = ty.strip_prefix("varchar")?;
    if rest.is_empty() {
        return Some(None);
    }
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    inner.trim().parse::<u32>().ok().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{calculate_diff, SchemaDiff, TableAlterDiff};
    use pretty_assertions::assert_eq;
    use terrane_schema::{ColumnDef, ModuleSchema, TableDef};

    fn snapshot_of(tables: Vec<TableDef>) -> terrane_schema::Snapshot {
        let mut module = ModuleSchema::new("core");
        for table in tables {
            module = module.table(table);
        }
        module.snapshot().unwrap()
    }

    #[test]
    fn empty_diff_is_safe() {
        let check = check_for_data_loss(&SchemaDiff::default());
        assert!(!check.has_data_loss);
        assert!(!check.requires_confirmation);
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn dropped_table_requires_confirmation() {
        let before = snapshot_of(vec![TableDef::new("users"), TableDef::new("legacy")]);
        let after = snapshot_of(vec![TableDef::new("users")]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert!(check.has_data_loss);
        assert!(check.requires_confirmation);
        assert_eq!(check.tables_to_remove, vec!["legacy".to_string()]);
    }

    #[test]
    fn dropped_column_is_qualified() {
        let before = snapshot_of(vec![TableDef::new("users")
            .column(ColumnDef::new("id", "uuid").not_null())
            .column(ColumnDef::new("nickname", "text"))]);
        let after = snapshot_of(vec![
            TableDef::new("users").column(ColumnDef::new("id", "uuid").not_null()),
        ]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert!(check.has_data_loss);
        assert_eq!(check.columns_to_remove, vec!["users.nickname".to_string()]);
    }

    #[test]
    fn widening_type_changes_are_safe() {
        assert!(is_lossless_type_change("integer", "bigint"));
        assert!(is_lossless_type_change("smallint", "integer"));
        assert!(is_lossless_type_change("varchar(64)", "varchar(255)"));
        assert!(is_lossless_type_change("varchar(64)", "varchar"));
        assert!(is_lossless_type_change("varchar(64)", "text"));
        assert!(is_lossless_type_change("char(2)", "text"));
    }

    #[test]
    fn narrowing_type_changes_are_flagged() {
        assert!(!is_lossless_type_change("bigint", "integer"));
        assert!(!is_lossless_type_change("varchar(255)", "varchar(64)"));
        assert!(!is_lossless_type_change("text", "varchar(64)"));
        assert!(!is_lossless_type_change("text", "integer"));
    }

    #[test]
    fn flagged_type_change_carries_both_sides() {
        let before = snapshot_of(vec![
            TableDef::new("events").column(ColumnDef::new("size", "bigint")),
        ]);
        let after = snapshot_of(vec![
            TableDef::new("events").column(ColumnDef::new("size", "integer")),
        ]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert_eq!(
            check.type_changes,
            vec![TypeChange {
                table: "events".to_string(),
                column: "size".to_string(),
                old_type: "bigint".to_string(),
                new_type: "integer".to_string(),
            }]
        );
    }

    #[test]
    fn lossy_type_change_marks_table_for_rewrite() {
        let before = snapshot_of(vec![
            TableDef::new("events").column(ColumnDef::new("payload", "text")),
        ]);
        let after = snapshot_of(vec![
            TableDef::new("events").column(ColumnDef::new("payload", "integer")),
        ]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert!(check.has_data_loss);
        assert_eq!(check.tables_to_truncate, vec!["events".to_string()]);
    }

    #[test]
    fn rewrite_table_is_listed_once_across_columns() {
        let before = snapshot_of(vec![TableDef::new("events")
            .column(ColumnDef::new("payload", "text"))
            .column(ColumnDef::new("size", "bigint"))]);
        let after = snapshot_of(vec![TableDef::new("events")
            .column(ColumnDef::new("payload", "integer"))
            .column(ColumnDef::new("size", "integer"))]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert_eq!(check.type_changes.len(), 2);
        assert_eq!(check.tables_to_truncate, vec!["events".to_string()]);
    }

    #[test]
    fn not_null_tightening_warns_without_blocking() {
        let before = snapshot_of(vec![
            TableDef::new("users").column(ColumnDef::new("email", "text")),
        ]);
        let after = snapshot_of(vec![
            TableDef::new("users").column(ColumnDef::new("email", "text").not_null()),
        ]);
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert!(!check.has_data_loss);
        assert_eq!(check.warnings.len(), 1);
    }

    #[test]
    fn enum_value_removal_is_destructive() {
        let before = ModuleSchema::new("core")
            .enum_type("status", ["active", "retired"])
            .snapshot()
            .unwrap();
        let after = ModuleSchema::new("core")
            .enum_type("status", ["active"])
            .snapshot()
            .unwrap();
        let diff = calculate_diff(Some(&before), &after);

        let check = check_for_data_loss(&diff);
        assert!(check.has_data_loss);
        assert!(check.requires_confirmation);
    }

    #[test]
    fn added_not_null_column_without_default_warns() {
        let mut diff = SchemaDiff::default();
        diff.alter_tables.push(TableAlterDiff {
            table: "users".to_string(),
            add_columns: vec![terrane_schema::Column {
                name: "tenant".to_string(),
                data_type: "uuid".to_string(),
                not_null: true,
                default: None,
                identity: false,
                enum_ref: None,
            }],
            ..Default::default()
        });

        let check = check_for_data_loss(&diff);
        assert!(!check.has_data_loss);
        assert_eq!(check.warnings.len(), 1);
    }
}
