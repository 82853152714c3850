//! Error types for schema declaration and validation.

use thiserror::Error;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while normalizing or validating a declared schema.
///
/// All of these are caller bugs: the engine rejects the declared schema
/// before any diffing or DDL takes place.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Module name is empty or unusable as a partition key.
    #[error("invalid module name: {0:?}")]
    InvalidModuleName(String),

    /// Two tables share a name within the module's namespace.
    #[error("duplicate table '{0}' in namespace '{1}'")]
    DuplicateTable(String, String),

    /// Two columns share a name within a table.
    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Two enum types share a name.
    #[error("duplicate enum type '{0}'")]
    DuplicateEnum(String),

    /// A primary key, index, or constraint names a column that does not
    /// exist on its table.
    #[error("table '{table}': {constraint} references undefined column '{column}'")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Describes the referencing constraint (e.g. "primary key").
        constraint: String,
        /// The missing column.
        column: String,
    },

    /// A foreign key targets a table that is neither in the snapshot nor
    /// declared external.
    #[error(
        "table '{table}': foreign key '{name}' references undefined table '{ref_table}' \
         (declare it external if another module owns it)"
    )]
    DanglingForeignKey {
        /// Source table.
        table: String,
        /// Constraint name.
        name: String,
        /// Missing referenced table.
        ref_table: String,
    },

    /// A foreign key's source and target column lists differ in length.
    #[error("table '{table}': foreign key '{name}' has mismatched column counts")]
    ForeignKeyArity {
        /// Source table.
        table: String,
        /// Constraint name.
        name: String,
    },

    /// A column references an enum type the module does not declare.
    #[error("table '{table}': column '{column}' references undefined enum '{enum_name}'")]
    UnknownEnum {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Missing enum type.
        enum_name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_offender() {
        let err = SchemaError::DanglingForeignKey {
            table: "posts".to_string(),
            name: "posts_author_fk".to_string(),
            ref_table: "users".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("posts_author_fk"));
        assert!(msg.contains("users"));

        let err = SchemaError::UnknownColumn {
            table: "users".to_string(),
            constraint: "primary key".to_string(),
            column: "uid".to_string(),
        };
        assert!(err.to_string().contains("uid"));
    }
}
