//! Database handle and backend capabilities.
//!
//! The engine drives everything through [`MigratorDb`], a thin wrapper
//! around a `deadpool-postgres` pool paired with a [`Capabilities`] value
//! resolved once at construction. Code downstream never probes the driver
//! for backend quirks; it consults the capability flags instead.

use deadpool_postgres::{Object, Pool};
use tracing::debug;

use crate::error::MigrateResult;

/// What the target backend supports.
///
/// Limited Postgres-compatible backends (embedded engines, pooler
/// frontends) may lack schemas, advisory locks, or transactional DDL.
/// The flags are fixed at construction; nothing re-detects them per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Backend supports `CREATE SCHEMA` namespacing. Without it,
    /// bookkeeping tables are created unprefixed and module namespaces
    /// collapse into the default one.
    pub supports_namespaces: bool,
    /// Backend supports session-scoped advisory locks. Without them the
    /// engine runs unlocked (single-process deployments only).
    pub supports_advisory_locks: bool,
    /// DDL participates in transactions and rolls back with them.
    pub supports_transactional_ddl: bool,
}

impl Capabilities {
    /// Full PostgreSQL: everything supported.
    pub fn postgres() -> Self {
        Self {
            supports_namespaces: true,
            supports_advisory_locks: true,
            supports_transactional_ddl: true,
        }
    }

    /// A minimal embedded backend: no namespaces, no advisory locks,
    /// no transactional DDL.
    pub fn minimal() -> Self {
        Self {
            supports_namespaces: false,
            supports_advisory_locks: false,
            supports_transactional_ddl: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::postgres()
    }
}

/// Pool handle used by every engine component.
#[derive(Clone)]
pub struct MigratorDb {
    pool: Pool,
    capabilities: Capabilities,
}

impl MigratorDb {
    /// Wrap a pool, assuming full PostgreSQL capabilities.
    pub fn new(pool: Pool) -> Self {
        Self::with_capabilities(pool, Capabilities::postgres())
    }

    /// Wrap a pool with explicitly resolved capabilities.
    pub fn with_capabilities(pool: Pool, capabilities: Capabilities) -> Self {
        Self { pool, capabilities }
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> MigrateResult<Object> {
        debug!("acquiring connection from pool");
        Ok(self.pool.get().await?)
    }

    /// The backend capabilities resolved at construction.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// The reserved namespace that holds the engine's bookkeeping tables.
pub const BOOKKEEPING_NAMESPACE: &str = "migrations";

/// Resolve a bookkeeping table's full name for the given capabilities:
/// namespace-qualified on full backends, bare (private naming convention)
/// otherwise.
pub fn bookkeeping_table(capabilities: Capabilities, base: &str) -> String {
    if capabilities.supports_namespaces {
        format!("{BOOKKEEPING_NAMESPACE}.{base}")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_capabilities_are_full() {
        let caps = Capabilities::postgres();
        assert!(caps.supports_namespaces);
        assert!(caps.supports_advisory_locks);
        assert!(caps.supports_transactional_ddl);
        assert_eq!(Capabilities::default(), caps);
    }

    #[test]
    fn bookkeeping_table_prefixing() {
        assert_eq!(
            bookkeeping_table(Capabilities::postgres(), "_journal"),
            "migrations._journal"
        );
        assert_eq!(
            bookkeeping_table(Capabilities::minimal(), "_journal"),
            "_journal"
        );
    }
}
