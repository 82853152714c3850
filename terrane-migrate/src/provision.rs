//! Namespace and extension provisioning before DDL runs.

use tokio_postgres::GenericClient;
use tracing::debug;

use crate::db::Capabilities;
use crate::error::MigrateResult;
use crate::sql::quote_ident;

/// Creates the objects a module's DDL assumes: its namespace and any
/// extensions its declarations require.
#[derive(Debug, Clone)]
pub struct Provisioner {
    capabilities: Capabilities,
}

impl Provisioner {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Create the module's namespace if missing. A no-op on backends
    /// without namespace support.
    pub async fn ensure_namespace(
        &self,
        client: &impl GenericClient,
        namespace: &str,
    ) -> MigrateResult<()> {
        if !self.capabilities.supports_namespaces {
            debug!(namespace, "backend has no namespace support, skipping");
            return Ok(());
        }
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(namespace));
        client.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Install required extensions, idempotently. Install may be denied
    /// by role grants; failures are logged and left for the dependent
    /// DDL to report.
    pub async fn install_extensions(&self, client: &impl GenericClient, extensions: &[String]) {
        for extension in extensions {
            let sql = format!(
                "CREATE EXTENSION IF NOT EXISTS {}",
                quote_ident(extension)
            );
            if let Err(err) = client.execute(&sql, &[]).await {
                debug!(extension, error = %err, "extension install failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioner_carries_capabilities() {
        let provisioner = Provisioner::new(Capabilities::postgres());
        assert!(provisioner.capabilities.supports_namespaces);
    }
}
