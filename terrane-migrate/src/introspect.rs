//! Database introspection for reconstructing snapshots from live schemas.
//!
//! Used when a module already owns tables but bookkeeping has no recorded
//! snapshot for it, so the diff can run against what actually exists.

use indexmap::IndexMap;
use std::collections::BTreeMap;

use terrane_schema::{
    CheckConstraint, Column, EnumDef, ForeignKey, Index, PrimaryKey, ReferentialAction, Snapshot,
    Table,
};
use tokio_postgres::GenericClient;
use tracing::debug;

use crate::error::MigrateResult;

/// Reads a namespace's live structure into a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct DatabaseIntrospector {
    namespace: String,
}

impl DatabaseIntrospector {
    /// Create an introspector for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Whether the namespace contains any base tables.
    pub async fn has_existing_tables(&self, client: &impl GenericClient) -> MigrateResult<bool> {
        let row = client
            .query_one(queries::TABLE_COUNT, &[&self.namespace])
            .await?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    /// Build a snapshot of the namespace's current structure.
    pub async fn introspect(&self, client: &impl GenericClient) -> MigrateResult<Snapshot> {
        let mut snapshot = Snapshot::empty(&self.namespace);

        let enums = self.read_enums(client).await?;
        let enum_names: Vec<String> = enums.keys().cloned().collect();
        snapshot.enums = enums;

        let table_rows = client.query(queries::TABLES, &[&self.namespace]).await?;
        for table_row in table_rows {
            let table_name: String = table_row.get("table_name");
            let table = self.read_table(client, &table_name, &enum_names).await?;
            debug!(
                namespace = %self.namespace,
                table = %table_name,
                columns = table.columns.len(),
                "introspected table"
            );
            snapshot.tables.insert(table_name, table);
        }

        Ok(snapshot)
    }

    async fn read_enums(
        &self,
        client: &impl GenericClient,
    ) -> MigrateResult<BTreeMap<String, EnumDef>> {
        let rows = client.query(queries::ENUMS, &[&self.namespace]).await?;
        let mut enums = BTreeMap::new();
        for row in rows {
            let name: String = row.get("enum_name");
            let values: Vec<String> = row.get("enum_values");
            enums.insert(name.clone(), EnumDef { name, values });
        }
        Ok(enums)
    }

    async fn read_table(
        &self,
        client: &impl GenericClient,
        table: &str,
        enum_names: &[String],
    ) -> MigrateResult<Table> {
        let mut out = Table {
            name: table.to_string(),
            namespace: self.namespace.clone(),
            columns: IndexMap::new(),
            primary_key: None,
            indexes: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            unique_constraints: BTreeMap::new(),
            check_constraints: BTreeMap::new(),
        };

        let column_rows = client
            .query(queries::COLUMNS, &[&self.namespace, &table])
            .await?;
        for row in column_rows {
            let name: String = row.get("column_name");
            let udt_name: String = row.get("udt_name");
            let data_type: String = row.get("data_type");
            let char_len: Option<i32> = row.get("character_maximum_length");
            let is_nullable: bool = row.get("is_nullable");
            let is_identity: bool = row.get("is_identity");
            let column_default: Option<String> = row.get("column_default");

            let enum_ref = enum_names
                .iter()
                .find(|e| e.as_str() == udt_name)
                .cloned();
            // Sequence-backed defaults are modelled as identity, not as a
            // default expression.
            let serial_default = column_default
                .as_deref()
                .is_some_and(|d| d.contains("nextval"));
            let identity = is_identity || serial_default;
            let default = if identity {
                None
            } else {
                column_default.as_deref().map(normalize_default)
            };

            let data_type = match &enum_ref {
                Some(e) => e.clone(),
                None => normalize_type(&udt_name, &data_type, char_len),
            };

            out.columns.insert(
                name.clone(),
                Column {
                    name,
                    data_type,
                    not_null: !is_nullable,
                    default,
                    identity,
                    enum_ref,
                },
            );
        }

        self.read_constraints(client, table, &mut out).await?;
        self.read_indexes(client, table, &mut out).await?;
        Ok(out)
    }

    async fn read_constraints(
        &self,
        client: &impl GenericClient,
        table: &str,
        out: &mut Table,
    ) -> MigrateResult<()> {
        let rows = client
            .query(queries::CONSTRAINTS, &[&self.namespace, &table])
            .await?;

        // Rows arrive one per (constraint, column); fold them back together.
        struct Folded {
            constraint_type: String,
            columns: Vec<String>,
            ref_schema: Option<String>,
            ref_table: Option<String>,
            ref_columns: Vec<String>,
            delete_rule: Option<String>,
            update_rule: Option<String>,
            check_clause: Option<String>,
        }
        let mut folded: IndexMap<String, Folded> = IndexMap::new();

        for row in rows {
            let name: String = row.get("constraint_name");
            let entry = folded.entry(name).or_insert_with(|| Folded {
                constraint_type: row.get("constraint_type"),
                columns: Vec::new(),
                ref_schema: row.get("referenced_schema"),
                ref_table: row.get("referenced_table"),
                ref_columns: Vec::new(),
                delete_rule: row.get("delete_rule"),
                update_rule: row.get("update_rule"),
                check_clause: row.get("check_clause"),
            });
            if let Some(column) = row.get::<_, Option<String>>("column_name")
                && !entry.columns.contains(&column)
            {
                entry.columns.push(column);
            }
            if let Some(ref_column) = row.get::<_, Option<String>>("referenced_column")
                && !entry.ref_columns.contains(&ref_column)
            {
                entry.ref_columns.push(ref_column);
            }
        }

        for (name, c) in folded {
            match c.constraint_type.as_str() {
                "PRIMARY KEY" => {
                    out.primary_key = Some(PrimaryKey {
                        name,
                        columns: c.columns,
                    });
                }
                "UNIQUE" => {
                    out.unique_constraints.insert(
                        name.clone(),
                        terrane_schema::UniqueConstraint {
                            name,
                            columns: c.columns,
                        },
                    );
                }
                "FOREIGN KEY" => {
                    let Some(ref_table) = c.ref_table else { continue };
                    // References into another namespace are not owned by
                    // this module's snapshot.
                    let external = c
                        .ref_schema
                        .as_deref()
                        .is_some_and(|schema| schema != self.namespace);
                    out.foreign_keys.insert(
                        name.clone(),
                        ForeignKey {
                            name,
                            columns: c.columns,
                            ref_table,
                            ref_columns: c.ref_columns,
                            on_delete: parse_referential_action(c.delete_rule.as_deref()),
                            on_update: parse_referential_action(c.update_rule.as_deref()),
                            external,
                        },
                    );
                }
                "CHECK" => {
                    let Some(clause) = c.check_clause else { continue };
                    // information_schema surfaces column NOT NULL as
                    // synthetic CHECK constraints; those are already
                    // captured on the column itself.
                    if is_not_null_clause(&clause) {
                        continue;
                    }
                    out.check_constraints.insert(
                        name.clone(),
                        CheckConstraint {
                            name,
                            expression: strip_outer_parens(&clause).to_string(),
                        },
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn read_indexes(
        &self,
        client: &impl GenericClient,
        table: &str,
        out: &mut Table,
    ) -> MigrateResult<()> {
        let rows = client
            .query(queries::INDEXES, &[&self.namespace, &table])
            .await?;
        for row in rows {
            let name: String = row.get("index_name");
            let columns: Vec<String> = row.get("columns");
            let unique: bool = row.get("is_unique");
            let method: String = row.get("index_method");
            out.indexes.insert(
                name.clone(),
                Index {
                    name,
                    columns,
                    unique,
                    method,
                },
            );
        }
        Ok(())
    }
}

fn parse_referential_action(rule: Option<&str>) -> ReferentialAction {
    match rule {
        Some("RESTRICT") => ReferentialAction::Restrict,
        Some("CASCADE") => ReferentialAction::Cascade,
        Some("SET NULL") => ReferentialAction::SetNull,
        Some("SET DEFAULT") => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

/// Map catalog type names onto the names declarations use, so the diff
/// compares like with like.
fn normalize_type(udt_name: &str, data_type: &str, char_len: Option<i32>) -> String {
    match udt_name {
        "int2" => "smallint".to_string(),
        "int4" => "integer".to_string(),
        "int8" => "bigint".to_string(),
        "float4" => "real".to_string(),
        "float8" => "double precision".to_string(),
        "bool" => "boolean".to_string(),
        "varchar" => match char_len {
            Some(n) => format!("varchar({n})"),
            None => "varchar".to_string(),
        },
        "bpchar" => match char_len {
            Some(n) => format!("char({n})"),
            None => "char".to_string(),
        },
        "timestamptz" => "timestamptz".to_string(),
        "timestamp" => "timestamp".to_string(),
        "timetz" => "timetz".to_string(),
        "_text" => "text[]".to_string(),
        "_int4" => "integer[]".to_string(),
        "_uuid" => "uuid[]".to_string(),
        other if data_type == "ARRAY" => format!("{}[]", other.trim_start_matches('_')),
        other => other.to_string(),
    }
}

/// Strip type casts Postgres appends to stored defaults, so a declared
/// `'{}'` matches a recorded `'{}'::jsonb`.
fn normalize_default(default: &str) -> String {
    let trimmed = default.trim();
    if let Some(pos) = trimmed.rfind("::")
        && !trimmed[pos..].contains(['(', '\''])
    {
        return trimmed[..pos].trim().to_string();
    }
    trimmed.to_string()
}

fn is_not_null_clause(clause: &str) -> bool {
    clause.to_uppercase().contains("IS NOT NULL")
        && !clause.to_uppercase().contains(" AND ")
        && !clause.to_uppercase().contains(" OR ")
}

fn strip_outer_parens(clause: &str) -> &str {
    let trimmed = clause.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        let inner = &trimmed[1..trimmed.len() - 1];
        // Only strip when the parens actually wrap the whole expression.
        let mut depth = 0i32;
        for (i, ch) in inner.char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 && i < inner.len() - 1 {
                        return trimmed;
                    }
                }
                _ => {}
            }
        }
        if depth >= 0 {
            return inner.trim();
        }
    }
    trimmed
}

/// SQL queries against the PostgreSQL catalogs.
pub mod queries {
    /// Count of base tables in a namespace.
    pub const TABLE_COUNT: &str = r#"
        SELECT COUNT(*)
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
    "#;

    /// Base tables in a namespace.
    pub const TABLES: &str = r#"
        SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#;

    /// Columns of a table, in declaration order.
    pub const COLUMNS: &str = r#"
        SELECT
            column_name,
            data_type,
            udt_name,
            character_maximum_length,
            is_nullable = 'YES' AS is_nullable,
            is_identity = 'YES' AS is_identity,
            column_default
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;

    /// Constraints of a table, one row per member column.
    pub const CONSTRAINTS: &str = r#"
        SELECT
            tc.constraint_name,
            tc.constraint_type,
            kcu.column_name,
            ccu.table_schema AS referenced_schema,
            ccu.table_name AS referenced_table,
            ccu.column_name AS referenced_column,
            rc.delete_rule,
            rc.update_rule,
            cc.check_clause
        FROM information_schema.table_constraints tc
        LEFT JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        LEFT JOIN information_schema.constraint_column_usage ccu
            ON tc.constraint_name = ccu.constraint_name
            AND tc.constraint_schema = ccu.constraint_schema
            AND tc.constraint_type = 'FOREIGN KEY'
        LEFT JOIN information_schema.referential_constraints rc
            ON tc.constraint_name = rc.constraint_name
            AND tc.table_schema = rc.constraint_schema
        LEFT JOIN information_schema.check_constraints cc
            ON tc.constraint_name = cc.constraint_name
            AND tc.table_schema = cc.constraint_schema
        WHERE tc.table_schema = $1 AND tc.table_name = $2
        ORDER BY tc.constraint_name, kcu.ordinal_position
    "#;

    /// Plain indexes of a table. Constraint-backed indexes are excluded
    /// because they are represented as constraints in the snapshot.
    pub const INDEXES: &str = r#"
        SELECT
            i.relname AS index_name,
            array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns,
            ix.indisunique AS is_unique,
            am.amname AS index_method
        FROM pg_index ix
        JOIN pg_class i ON ix.indexrelid = i.oid
        JOIN pg_class t ON ix.indrelid = t.oid
        JOIN pg_namespace n ON t.relnamespace = n.oid
        JOIN pg_am am ON i.relam = am.oid
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = $1
            AND t.relname = $2
            AND NOT ix.indisprimary
            AND NOT EXISTS (
                SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid
            )
        GROUP BY i.relname, ix.indisunique, am.amname
        ORDER BY i.relname
    "#;

    /// Enum types defined in a namespace, values in sort order.
    pub const ENUMS: &str = r#"
        SELECT
            t.typname AS enum_name,
            array_agg(e.enumlabel ORDER BY e.enumsortorder) AS enum_values
        FROM pg_type t
        JOIN pg_namespace n ON t.typnamespace = n.oid
        JOIN pg_enum e ON t.oid = e.enumtypid
        WHERE n.nspname = $1
        GROUP BY t.typname
        ORDER BY t.typname
    "#;
}
