//! DDL generation for a computed diff.
//!
//! Statements come out in dependency order: renames first so later
//! statements address current names, then enums, then tables and columns,
//! then indexes and constraints, with all foreign keys added in a late
//! phase so creation order between tables never matters. Destructive
//! drops always come last.

use terrane_schema::{Column, ForeignKey, Index, Snapshot, Table, UniqueConstraint};

use crate::diff::{ColumnAlterDiff, EnumAlterDiff, SchemaDiff, TableAlterDiff};

/// SQL generator for PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresSqlGenerator {
    namespace: String,
}

impl PostgresSqlGenerator {
    /// Create a generator emitting identifiers qualified by `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Generate ordered DDL for a diff. The target snapshot supplies
    /// full enum definitions and column references for enum rebuilds.
    pub fn generate(&self, diff: &SchemaDiff, target: &Snapshot) -> Vec<String> {
        let mut stmts = Vec::new();

        // Renames first, so everything after sees current names.
        for rename in &diff.rename_tables {
            stmts.push(self.rename_table_sql(&rename.old_name, &rename.new_name));
        }
        for alter in &diff.alter_tables {
            for rename in &alter.rename_columns {
                stmts.push(self.rename_column_sql(
                    &alter.table,
                    &rename.old_name,
                    &rename.new_name,
                ));
            }
        }

        // Enums before the tables that use them.
        for enum_def in &diff.create_enums {
            stmts.push(self.create_enum(&enum_def.name, &enum_def.values));
        }
        for alter in &diff.alter_enums {
            stmts.extend(self.alter_enum(alter, target));
        }

        // Tables are created without foreign keys; those come in the
        // late phase regardless of which table references which.
        for table in &diff.create_tables {
            stmts.push(self.create_table(table));
        }

        // Drop replaced constraints before re-adding definitions under
        // the same name.
        for alter in &diff.alter_tables {
            stmts.extend(self.drop_constraints(alter));
        }

        for alter in &diff.alter_tables {
            stmts.extend(self.alter_columns(alter));
        }

        for alter in &diff.alter_tables {
            stmts.extend(self.add_constraints(alter));
        }
        for table in &diff.create_tables {
            for index in table.indexes.values() {
                stmts.push(self.create_index(&table.name, index));
            }
        }

        // All foreign keys, new tables and altered tables alike.
        for table in &diff.create_tables {
            for fk in table.foreign_keys.values() {
                stmts.push(self.add_foreign_key(&table.name, fk));
            }
        }
        for alter in &diff.alter_tables {
            for fk in &alter.add_foreign_keys {
                stmts.push(self.add_foreign_key(&alter.table, fk));
            }
        }

        // Destructive statements run last.
        for alter in &diff.alter_tables {
            for column in &alter.drop_columns {
                stmts.push(format!(
                    "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                    self.qualify(&alter.table),
                    quote_ident(column)
                ));
            }
        }
        for name in &diff.drop_tables {
            stmts.push(format!(
                "DROP TABLE IF EXISTS {} CASCADE;",
                self.qualify(name)
            ));
        }
        for name in &diff.drop_enums {
            stmts.push(format!("DROP TYPE IF EXISTS {};", self.qualify(name)));
        }

        stmts
    }

    /// Generate ALTER TABLE RENAME for a table.
    pub fn rename_table_sql(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {};",
            self.qualify(old_name),
            quote_ident(new_name)
        )
    }

    /// Generate ALTER TABLE RENAME COLUMN.
    pub fn rename_column_sql(&self, table: &str, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {};",
            self.qualify(table),
            quote_ident(old_name),
            quote_ident(new_name)
        )
    }

    fn create_enum(&self, name: &str, values: &[String]) -> String {
        let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
        format!(
            "CREATE TYPE {} AS ENUM ({});",
            self.qualify(name),
            values.join(", ")
        )
    }

    fn alter_enum(&self, alter: &EnumAlterDiff, target: &Snapshot) -> Vec<String> {
        let mut stmts = Vec::new();

        if alter.remove_values.is_empty() {
            for value in &alter.add_values {
                stmts.push(format!(
                    "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};",
                    self.qualify(&alter.name),
                    quote_literal(value)
                ));
            }
            return stmts;
        }

        // Postgres cannot remove enum values in place; rebuild the type
        // and repoint every column that uses it.
        let Some(target_enum) = target.enums.get(&alter.name) else {
            return stmts;
        };
        let old_name = format!("{}_old", alter.name);
        stmts.push(format!(
            "ALTER TYPE {} RENAME TO {};",
            self.qualify(&alter.name),
            quote_ident(&old_name)
        ));
        stmts.push(self.create_enum(&alter.name, &target_enum.values));
        for table in target.tables.values() {
            for column in table.columns.values() {
                if column.enum_ref.as_deref() == Some(alter.name.as_str()) {
                    stmts.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::text::{};",
                        self.qualify(&table.name),
                        quote_ident(&column.name),
                        self.qualify(&alter.name),
                        quote_ident(&column.name),
                        self.qualify(&alter.name)
                    ));
                }
            }
        }
        stmts.push(format!("DROP TYPE {};", self.qualify(&old_name)));
        stmts
    }

    fn create_table(&self, table: &Table) -> String {
        let mut parts = Vec::new();

        for column in table.columns.values() {
            parts.push(self.column_definition(column));
        }

        if let Some(pk) = &table.primary_key {
            let cols: Vec<String> = pk.columns.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&pk.name),
                cols.join(", ")
            ));
        }

        for uc in table.unique_constraints.values() {
            let cols: Vec<String> = uc.columns.iter().map(|c| quote_ident(c)).collect();
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote_ident(&uc.name),
                cols.join(", ")
            ));
        }

        for check in table.check_constraints.values() {
            parts.push(format!(
                "CONSTRAINT {} CHECK ({})",
                quote_ident(&check.name),
                check.expression
            ));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.qualify(&table.name),
            parts.join(",\n    ")
        )
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![quote_ident(&column.name), self.column_type(column)];

        if column.identity {
            parts.push("GENERATED ALWAYS AS IDENTITY".to_string());
        }
        if column.not_null {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {default}"));
        }

        parts.join(" ")
    }

    fn column_type(&self, column: &Column) -> String {
        match &column.enum_ref {
            Some(enum_name) => self.qualify(enum_name),
            None => column.data_type.clone(),
        }
    }

    fn drop_constraints(&self, alter: &TableAlterDiff) -> Vec<String> {
        let mut stmts = Vec::new();
        let table = self.qualify(&alter.table);

        for name in &alter.drop_foreign_keys {
            stmts.push(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {};",
                quote_ident(name)
            ));
        }
        for name in &alter.drop_unique_constraints {
            stmts.push(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {};",
                quote_ident(name)
            ));
        }
        for name in &alter.drop_check_constraints {
            stmts.push(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {};",
                quote_ident(name)
            ));
        }
        for name in &alter.drop_indexes {
            stmts.push(format!(
                "DROP INDEX IF EXISTS {};",
                self.qualify(name)
            ));
        }
        if let Some(name) = &alter.drop_primary_key {
            stmts.push(format!(
                "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {};",
                quote_ident(name)
            ));
        }

        stmts
    }

    fn alter_columns(&self, alter: &TableAlterDiff) -> Vec<String> {
        let mut stmts = Vec::new();
        let table = self.qualify(&alter.table);

        for column in &alter.add_columns {
            stmts.push(format!(
                "ALTER TABLE {table} ADD COLUMN {};",
                self.column_definition(column)
            ));
        }

        for change in &alter.alter_columns {
            stmts.extend(self.alter_column(&table, change));
        }

        if let Some(pk) = &alter.set_primary_key {
            let cols: Vec<String> = pk.columns.iter().map(|c| quote_ident(c)).collect();
            stmts.push(format!(
                "ALTER TABLE {table} ADD CONSTRAINT {} PRIMARY KEY ({});",
                quote_ident(&pk.name),
                cols.join(", ")
            ));
        }

        stmts
    }

    fn alter_column(&self, table: &str, change: &ColumnAlterDiff) -> Vec<String> {
        let mut stmts = Vec::new();
        let column = quote_ident(&change.name);

        if let Some(new_type) = &change.new_type {
            stmts.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {new_type} USING {column}::{new_type};"
            ));
        }

        if let Some(new_not_null) = change.new_not_null {
            if new_not_null {
                stmts.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL;"
                ));
            } else {
                stmts.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL;"
                ));
            }
        }

        if change.default_changed {
            match &change.new_default {
                Some(default) => stmts.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default};"
                )),
                None => stmts.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT;"
                )),
            }
        }

        stmts
    }

    fn add_constraints(&self, alter: &TableAlterDiff) -> Vec<String> {
        let mut stmts = Vec::new();
        let table = self.qualify(&alter.table);

        for index in &alter.add_indexes {
            stmts.push(self.create_index(&alter.table, index));
        }
        for uc in &alter.add_unique_constraints {
            stmts.push(self.add_unique(&table, uc));
        }
        for check in &alter.add_check_constraints {
            stmts.push(format!(
                "ALTER TABLE {table} ADD CONSTRAINT {} CHECK ({});",
                quote_ident(&check.name),
                check.expression
            ));
        }

        stmts
    }

    fn create_index(&self, table: &str, index: &Index) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({});",
            unique,
            quote_ident(&index.name),
            self.qualify(table),
            index.method,
            cols.join(", ")
        )
    }

    fn add_unique(&self, table: &str, uc: &UniqueConstraint) -> String {
        let cols: Vec<String> = uc.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "ALTER TABLE {table} ADD CONSTRAINT {} UNIQUE ({});",
            quote_ident(&uc.name),
            cols.join(", ")
        )
    }

    fn add_foreign_key(&self, table: &str, fk: &ForeignKey) -> String {
        let cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
        let ref_cols: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();
        // External targets live outside the module's namespace and are
        // referenced unqualified, resolving through the search path.
        let ref_table = if fk.external {
            quote_ident(&fk.ref_table)
        } else {
            self.qualify(&fk.ref_table)
        };
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {};",
            self.qualify(table),
            quote_ident(&fk.name),
            cols.join(", "),
            ref_table,
            ref_cols.join(", "),
            fk.on_delete.as_sql(),
            fk.on_update.as_sql()
        )
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.namespace), quote_ident(name))
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
