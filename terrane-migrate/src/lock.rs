//! Per-module advisory locking.
//!
//! Concurrent replicas of the same application may call `migrate` for the
//! same module at the same time. A PostgreSQL session-scoped advisory
//! lock keyed by a stable hash of the module name serializes them:
//! different modules hash to different keys and migrate in parallel,
//! while the same module is mutually exclusive across processes. Because
//! the lock is session-scoped, a crashed holder's lock is released when
//! its connection dies.

use std::time::{Duration, Instant};

use deadpool_postgres::Object;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::MigratorDb;
use crate::error::{MigrateResult, MigrationError};

/// How often the bounded wait re-polls `pg_try_advisory_lock`.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1)";

/// Derive the stable advisory-lock key for a module name.
///
/// First 8 bytes of sha-256 over the module name, big-endian, masked into
/// the non-negative `i64` range so the value is always a valid PostgreSQL
/// bigint lock key regardless of platform or engine version.
pub fn lock_key_for_module(module: &str) -> i64 {
    let digest = Sha256::digest(module.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// Check that a derived key is usable as a PostgreSQL bigint lock key.
pub fn is_valid_lock_key(key: i64) -> bool {
    key >= 0
}

/// A held advisory lock. Released explicitly via
/// [`AdvisoryLock::release`] on the engine's normal exit paths; dropping
/// the guard without releasing (a panic between acquire and release)
/// spawns the unlock so the pooled session does not return to the pool
/// still holding the lock. If the process dies outright, the database
/// releases the lock when the holding session ends.
pub struct AdvisoryLock {
    key: i64,
    module: String,
    conn: Option<Object>,
}

impl AdvisoryLock {
    /// Acquire the lock for `module`, polling up to `max_wait` before
    /// failing with a retryable [`MigrationError::LockContention`].
    pub async fn acquire(db: &MigratorDb, module: &str, max_wait: Duration) -> MigrateResult<Self> {
        let key = lock_key_for_module(module);
        debug_assert!(is_valid_lock_key(key));

        // The lock is session-scoped, so the same connection must be held
        // until release; it is pinned inside the guard.
        let conn = db.get().await?;
        let started = Instant::now();

        loop {
            let row = conn
                .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
                .await?;
            let acquired: bool = row.get(0);
            if acquired {
                debug!(module, key, "advisory lock acquired");
                return Ok(Self {
                    key,
                    module: module.to_string(),
                    conn: Some(conn),
                });
            }

            if started.elapsed() >= max_wait {
                return Err(MigrationError::LockContention {
                    module: module.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            debug!(module, key, "advisory lock busy, waiting");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Release the lock on the holding session.
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else { return };
        match conn.execute(UNLOCK_SQL, &[&self.key]).await {
            Ok(_) => debug!(module = %self.module, key = self.key, "advisory lock released"),
            // The session will release the lock when the connection is
            // recycled, so a failed unlock is survivable.
            Err(err) => warn!(
                module = %self.module,
                key = self.key,
                %err,
                "failed to release advisory lock explicitly"
            ),
        }
    }

    /// The derived lock key.
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let key = self.key;
        let module = std::mem::take(&mut self.module);
        // Reached only when the guard was dropped without an explicit
        // release, e.g. by a panic while migrating.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = conn.execute(UNLOCK_SQL, &[&key]).await {
                    warn!(module, key, %err, "failed to release advisory lock on drop");
                }
            });
        } else {
            warn!(
                module,
                key, "advisory lock dropped outside a runtime, held until the session closes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_deterministic() {
        assert_eq!(lock_key_for_module("blog"), lock_key_for_module("blog"));
        assert_ne!(lock_key_for_module("blog"), lock_key_for_module("auth"));
    }

    #[test]
    fn lock_key_is_always_in_bigint_range() {
        for module in ["", "a", "core", "plugin-sql", "ümläut-module", "x".repeat(512).as_str()] {
            let key = lock_key_for_module(module);
            assert!(is_valid_lock_key(key), "key {key} out of range for {module:?}");
        }
    }

    #[test]
    fn lock_guard_is_send() {
        // The drop-time unlock is spawned onto the runtime, which needs
        // the guard's contents to cross threads.
        fn assert_send<T: Send>() {}
        assert_send::<AdvisoryLock>();
    }

    #[test]
    fn lock_key_matches_known_derivation() {
        // sha256("core") first 8 bytes, high bit cleared.
        let digest = Sha256::digest(b"core");
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let expected = (u64::from_be_bytes(bytes) & 0x7FFF_FFFF_FFFF_FFFF) as i64;
        assert_eq!(lock_key_for_module("core"), expected);
    }
}
