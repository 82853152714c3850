//! Declarative schema API.
//!
//! Modules describe their target schema with [`ModuleSchema`] and the
//! builder types below; [`ModuleSchema::snapshot`] normalizes the
//! declaration into an immutable [`Snapshot`] after validation. Rename
//! hints (`renamed_from`) ride on the declaration side only; they never
//! enter the snapshot, which always describes the end state.

use std::collections::BTreeMap;

use crate::error::SchemaResult;
use crate::snapshot::{
    CheckConstraint, Column, EnumDef, ForeignKey, Index, PrimaryKey, ReferentialAction, Snapshot,
    Table, UniqueConstraint,
};
use crate::validate::validate_declaration;

/// Namespace reserved for the core module.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Derive a module's default namespace from its name: lowercased, with
/// every non-alphanumeric character folded to `_`.
pub fn derive_namespace(module: &str) -> String {
    module
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A module's declared target schema.
#[derive(Debug, Clone)]
pub struct ModuleSchema {
    module: String,
    namespace: String,
    extensions: Vec<String>,
    tables: Vec<TableDef>,
    enums: Vec<EnumDef>,
}

impl ModuleSchema {
    /// Create a declaration for `module`, with the namespace derived from
    /// the module name.
    pub fn new(module: impl Into<String>) -> Self {
        let module = module.into();
        let namespace = derive_namespace(&module);
        Self {
            module,
            namespace,
            extensions: Vec::new(),
            tables: Vec::new(),
            enums: Vec::new(),
        }
    }

    /// Create the declaration for the application's core module, which
    /// owns the default `public` namespace instead of a derived one.
    pub fn core(module: impl Into<String>) -> Self {
        Self::new(module).namespace(DEFAULT_NAMESPACE)
    }

    /// Override the namespace (e.g. `public` for the core module).
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Declare a required database extension (installed before DDL runs).
    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    /// Declare a table.
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Declare an enum type with its ordered values.
    pub fn enum_type(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.enums.push(EnumDef {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// The module identity: bookkeeping partition key and advisory-lock
    /// seed.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The namespace this module owns.
    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    /// Extensions this schema requires.
    pub fn required_extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Collect the explicit rename hints from the declaration.
    pub fn rename_hints(&self) -> RenameHints {
        let mut hints = RenameHints::default();
        for table in &self.tables {
            if let Some(old) = &table.renamed_from {
                hints.tables.insert(table.name.clone(), old.clone());
            }
            for col in &table.columns {
                if let Some(old) = &col.renamed_from {
                    hints
                        .columns
                        .insert((table.name.clone(), col.name.clone()), old.clone());
                }
            }
        }
        hints
    }

    /// Validate the declaration and normalize it into a [`Snapshot`].
    pub fn snapshot(&self) -> SchemaResult<Snapshot> {
        validate_declaration(&self.module, &self.namespace, &self.tables, &self.enums)?;

        let mut snapshot = Snapshot::empty(self.namespace.clone());
        for enum_def in &self.enums {
            snapshot.enums.insert(enum_def.name.clone(), enum_def.clone());
        }
        for table in &self.tables {
            snapshot
                .tables
                .insert(table.name.clone(), table.normalize(&self.namespace));
        }
        Ok(snapshot)
    }
}

/// Explicit rename hints extracted from a declaration.
///
/// Without a hint, a renamed entity diffs as delete + create and is
/// treated as destructive; the hint is what makes the engine emit an
/// `ALTER ... RENAME` instead.
#[derive(Debug, Clone, Default)]
pub struct RenameHints {
    /// New table name → old table name.
    pub tables: BTreeMap<String, String>,
    /// (table, new column name) → old column name.
    pub columns: BTreeMap<(String, String), String>,
}

impl RenameHints {
    /// True when no hints were declared.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

/// A declared table.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub(crate) name: String,
    pub(crate) renamed_from: Option<String>,
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) primary_key: Option<Vec<String>>,
    pub(crate) indexes: Vec<IndexDef>,
    pub(crate) foreign_keys: Vec<ForeignKeyDef>,
    pub(crate) unique_constraints: Vec<Vec<String>>,
    pub(crate) check_constraints: Vec<(String, String)>,
}

impl TableDef {
    /// Start declaring a table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            renamed_from: None,
            columns: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
            check_constraints: Vec::new(),
        }
    }

    /// Hint that this table was previously named `old`.
    pub fn renamed_from(mut self, old: impl Into<String>) -> Self {
        self.renamed_from = Some(old.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Declare the primary key columns.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Add a secondary index.
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Add a multi-column unique constraint.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_constraints
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Add a check constraint with an explicit name and expression.
    pub fn check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.check_constraints.push((name.into(), expression.into()));
        self
    }

    fn normalize(&self, namespace: &str) -> Table {
        let mut columns = indexmap::IndexMap::new();
        for col in &self.columns {
            columns.insert(col.name.clone(), col.normalize());
        }

        let primary_key = self.primary_key.as_ref().map(|cols| PrimaryKey {
            name: format!("{}_pkey", self.name),
            columns: cols.clone(),
        });

        let mut indexes = BTreeMap::new();
        for idx in &self.indexes {
            let normalized = idx.normalize(&self.name);
            indexes.insert(normalized.name.clone(), normalized);
        }

        let mut foreign_keys = BTreeMap::new();
        for fk in &self.foreign_keys {
            let normalized = fk.normalize(&self.name);
            foreign_keys.insert(normalized.name.clone(), normalized);
        }

        let mut unique_constraints = BTreeMap::new();
        for cols in &self.unique_constraints {
            let name = format!("{}_{}_key", self.name, cols.join("_"));
            unique_constraints.insert(
                name.clone(),
                UniqueConstraint {
                    name,
                    columns: cols.clone(),
                },
            );
        }

        let mut check_constraints = BTreeMap::new();
        for (name, expression) in &self.check_constraints {
            check_constraints.insert(
                name.clone(),
                CheckConstraint {
                    name: name.clone(),
                    expression: expression.clone(),
                },
            );
        }

        Table {
            name: self.name.clone(),
            namespace: namespace.to_string(),
            columns,
            primary_key,
            indexes,
            foreign_keys,
            unique_constraints,
            check_constraints,
        }
    }
}

/// A declared column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub(crate) name: String,
    pub(crate) data_type: String,
    pub(crate) not_null: bool,
    pub(crate) default: Option<String>,
    pub(crate) identity: bool,
    pub(crate) enum_ref: Option<String>,
    pub(crate) renamed_from: Option<String>,
}

impl ColumnDef {
    /// Declare a column with an SQL data type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            default: None,
            identity: false,
            enum_ref: None,
            renamed_from: None,
        }
    }

    /// Declare a column whose type is a module-owned enum.
    pub fn new_enum(name: impl Into<String>, enum_name: impl Into<String>) -> Self {
        let enum_name = enum_name.into();
        let mut col = Self::new(name, enum_name.clone());
        col.enum_ref = Some(enum_name);
        col
    }

    /// Mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Set a default value expression (verbatim SQL).
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Mark the column as a generated identity column.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.not_null = true;
        self
    }

    /// Hint that this column was previously named `old`.
    pub fn renamed_from(mut self, old: impl Into<String>) -> Self {
        self.renamed_from = Some(old.into());
        self
    }

    fn normalize(&self) -> Column {
        Column {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            not_null: self.not_null,
            default: self.default.clone(),
            identity: self.identity,
            enum_ref: self.enum_ref.clone(),
        }
    }
}

/// A declared index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub(crate) name: Option<String>,
    pub(crate) columns: Vec<String>,
    pub(crate) unique: bool,
    pub(crate) method: String,
}

impl IndexDef {
    /// Declare an index over `columns`.
    pub fn new(columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            method: "btree".to_string(),
        }
    }

    /// Give the index an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the index method (`gin`, `hnsw`, ...).
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    fn normalize(&self, table: &str) -> Index {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_idx", table, self.columns.join("_")));
        Index {
            name,
            columns: self.columns.clone(),
            unique: self.unique,
            method: self.method.clone(),
        }
    }
}

/// A declared foreign key.
#[derive(Debug, Clone)]
pub struct ForeignKeyDef {
    pub(crate) name: Option<String>,
    pub(crate) columns: Vec<String>,
    pub(crate) ref_table: String,
    pub(crate) ref_columns: Vec<String>,
    pub(crate) on_delete: ReferentialAction,
    pub(crate) on_update: ReferentialAction,
    pub(crate) external: bool,
}

impl ForeignKeyDef {
    /// Declare a foreign key from `columns` to `ref_table(ref_columns)`.
    pub fn new(columns: &[&str], ref_table: impl Into<String>, ref_columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            external: false,
        }
    }

    /// Give the constraint an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the `ON DELETE` action.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Set the `ON UPDATE` action.
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Mark the referenced table as owned by another module, exempting it
    /// from in-snapshot reference validation.
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    fn normalize(&self, table: &str) -> ForeignKey {
        let name = self.name.clone().unwrap_or_else(|| {
            format!(
                "{}_{}_{}_fk",
                table,
                self.columns.join("_"),
                self.ref_table.replace('.', "_")
            )
        });
        ForeignKey {
            name,
            columns: self.columns.clone(),
            ref_table: self.ref_table.clone(),
            ref_columns: self.ref_columns.clone(),
            on_delete: self.on_delete,
            on_update: self.on_update,
            external: self.external,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn namespace_derivation_folds_punctuation() {
        assert_eq!(derive_namespace("My-Plugin"), "my_plugin");
        assert_eq!(derive_namespace("agent.memory"), "agent_memory");
        assert_eq!(derive_namespace("core"), "core");
    }

    #[test]
    fn core_module_owns_public_namespace() {
        let schema = ModuleSchema::core("agent-core");
        assert_eq!(schema.namespace_name(), DEFAULT_NAMESPACE);
        assert_eq!(schema.module(), "agent-core");
        let snap = schema.snapshot().unwrap();
        assert_eq!(snap.namespace, "public");
    }

    #[test]
    fn zero_table_module_normalizes_to_empty_snapshot() {
        let schema = ModuleSchema::new("empty-module");
        let snap = schema.snapshot().unwrap();
        assert!(snap.is_empty());
        assert_eq!(snap.namespace, "empty_module");
    }

    #[test]
    fn declaration_normalizes_into_snapshot() {
        let schema = ModuleSchema::new("blog")
            .enum_type("post_status", ["draft", "published"])
            .table(
                TableDef::new("posts")
                    .column(ColumnDef::new("id", "integer").identity())
                    .column(ColumnDef::new("title", "text").not_null())
                    .column(ColumnDef::new_enum("status", "post_status").not_null())
                    .primary_key(&["id"])
                    .index(IndexDef::new(&["title"]).unique()),
            );

        let snap = schema.snapshot().unwrap();
        let posts = snap.table("posts").unwrap();
        assert_eq!(posts.columns.len(), 3);
        assert_eq!(
            posts.primary_key.as_ref().unwrap().name,
            "posts_pkey".to_string()
        );
        assert!(posts.indexes.contains_key("posts_title_idx"));
        assert!(snap.enums.contains_key("post_status"));
        // Declared column order survives normalization.
        let names: Vec<_> = posts.columns.keys().cloned().collect();
        assert_eq!(names, vec!["id", "title", "status"]);
    }

    #[test]
    fn rename_hints_are_collected_not_snapshotted() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("accounts")
                .renamed_from("users")
                .column(ColumnDef::new("id", "integer").identity())
                .column(ColumnDef::new("display_name", "text").renamed_from("name"))
                .primary_key(&["id"]),
        );

        let hints = schema.rename_hints();
        assert_eq!(hints.tables.get("accounts").unwrap(), "users");
        assert_eq!(
            hints
                .columns
                .get(&("accounts".to_string(), "display_name".to_string()))
                .unwrap(),
            "name"
        );

        // The snapshot describes the end state only.
        let snap = schema.snapshot().unwrap();
        assert!(snap.table("accounts").is_some());
        assert!(snap.table("users").is_none());
    }

    #[test]
    fn derived_constraint_names() {
        let schema = ModuleSchema::new("app").table(
            TableDef::new("members")
                .column(ColumnDef::new("org_id", "integer").not_null())
                .column(ColumnDef::new("user_id", "integer").not_null())
                .unique(&["org_id", "user_id"])
                .foreign_key(ForeignKeyDef::new(&["org_id"], "orgs", &["id"]).external()),
        );

        let snap = schema.snapshot().unwrap();
        let members = snap.table("members").unwrap();
        assert!(members
            .unique_constraints
            .contains_key("members_org_id_user_id_key"));
        assert!(members.foreign_keys.contains_key("members_org_id_orgs_fk"));
    }
}
