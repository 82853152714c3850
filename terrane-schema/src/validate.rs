//! Declaration validation.
//!
//! Runs before normalization so a broken declaration is rejected with a
//! precise [`SchemaError`] instead of surfacing later as a failed DDL
//! statement.

use std::collections::HashSet;

use crate::declare::TableDef;
use crate::error::{SchemaError, SchemaResult};
use crate::snapshot::EnumDef;

/// Validate a module declaration.
///
/// Checks, in order: module name usability, table/enum name uniqueness,
/// column uniqueness per table, and that every primary key, index,
/// unique/check constraint, and foreign key references columns (and for
/// foreign keys, tables) that actually exist. Foreign keys marked
/// external skip the target-table check: their referenced table is owned
/// by another module.
pub fn validate_declaration(
    module: &str,
    namespace: &str,
    tables: &[TableDef],
    enums: &[EnumDef],
) -> SchemaResult<()> {
    if module.trim().is_empty() {
        return Err(SchemaError::InvalidModuleName(module.to_string()));
    }

    let mut enum_names = HashSet::new();
    for enum_def in enums {
        if !enum_names.insert(enum_def.name.as_str()) {
            return Err(SchemaError::DuplicateEnum(enum_def.name.clone()));
        }
    }

    let mut table_names = HashSet::new();
    for table in tables {
        if !table_names.insert(table.name.as_str()) {
            return Err(SchemaError::DuplicateTable(
                table.name.clone(),
                namespace.to_string(),
            ));
        }
    }

    for table in tables {
        let mut columns = HashSet::new();
        for col in &table.columns {
            if !columns.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: table.name.clone(),
                    column: col.name.clone(),
                });
            }
            if let Some(enum_name) = &col.enum_ref
                && !enum_names.contains(enum_name.as_str())
            {
                return Err(SchemaError::UnknownEnum {
                    table: table.name.clone(),
                    column: col.name.clone(),
                    enum_name: enum_name.clone(),
                });
            }
        }

        if let Some(pk) = &table.primary_key {
            require_columns(&table.name, "primary key", pk, &columns)?;
        }
        for idx in &table.indexes {
            require_columns(&table.name, "index", &idx.columns, &columns)?;
        }
        for unique in &table.unique_constraints {
            require_columns(&table.name, "unique constraint", unique, &columns)?;
        }

        for fk in &table.foreign_keys {
            let name = fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fk", table.name, fk.columns.join("_")));
            if fk.columns.len() != fk.ref_columns.len() {
                return Err(SchemaError::ForeignKeyArity {
                    table: table.name.clone(),
                    name,
                });
            }
            require_columns(&table.name, "foreign key", &fk.columns, &columns)?;

            if !fk.external && !table_names.contains(fk.ref_table.as_str()) {
                return Err(SchemaError::DanglingForeignKey {
                    table: table.name.clone(),
                    name,
                    ref_table: fk.ref_table.clone(),
                });
            }
        }
    }

    Ok(())
}

fn require_columns(
    table: &str,
    constraint: &str,
    referenced: &[String],
    existing: &HashSet<&str>,
) -> SchemaResult<()> {
    for col in referenced {
        if !existing.contains(col.as_str()) {
            return Err(SchemaError::UnknownColumn {
                table: table.to_string(),
                constraint: constraint.to_string(),
                column: col.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declare::{ColumnDef, ForeignKeyDef, ModuleSchema, TableDef};

    #[test]
    fn rejects_empty_module_name() {
        let err = ModuleSchema::new("  ").snapshot().unwrap_err();
        assert!(matches!(err, SchemaError::InvalidModuleName(_)));
    }

    #[test]
    fn rejects_duplicate_tables() {
        let schema = ModuleSchema::new("app")
            .table(TableDef::new("users").column(ColumnDef::new("id", "integer")))
            .table(TableDef::new("users").column(ColumnDef::new("id", "integer")));
        assert!(matches!(
            schema.snapshot().unwrap_err(),
            SchemaError::DuplicateTable(name, _) if name == "users"
        ));
    }

    #[test]
    fn rejects_primary_key_over_missing_column() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("users")
                .column(ColumnDef::new("id", "integer"))
                .primary_key(&["uid"]),
        );
        assert!(matches!(
            schema.snapshot().unwrap_err(),
            SchemaError::UnknownColumn { column, .. } if column == "uid"
        ));
    }

    #[test]
    fn rejects_dangling_foreign_key() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("posts")
                .column(ColumnDef::new("author_id", "integer"))
                .foreign_key(ForeignKeyDef::new(&["author_id"], "users", &["id"])),
        );
        assert!(matches!(
            schema.snapshot().unwrap_err(),
            SchemaError::DanglingForeignKey { ref_table, .. } if ref_table == "users"
        ));
    }

    #[test]
    fn external_foreign_key_is_allowed() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("posts")
                .column(ColumnDef::new("author_id", "integer"))
                .foreign_key(ForeignKeyDef::new(&["author_id"], "core.users", &["id"]).external()),
        );
        assert!(schema.snapshot().is_ok());
    }

    #[test]
    fn rejects_unknown_enum_reference() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("posts").column(ColumnDef::new_enum("status", "post_status")),
        );
        assert!(matches!(
            schema.snapshot().unwrap_err(),
            SchemaError::UnknownEnum { enum_name, .. } if enum_name == "post_status"
        ));
    }

    #[test]
    fn rejects_foreign_key_arity_mismatch() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("posts")
                .column(ColumnDef::new("a", "integer"))
                .column(ColumnDef::new("b", "integer"))
                .foreign_key(ForeignKeyDef::new(&["a", "b"], "t", &["id"]).external()),
        );
        assert!(matches!(
            schema.snapshot().unwrap_err(),
            SchemaError::ForeignKeyArity { .. }
        ));
    }
}
