// # DNS Backend Trait
//
// Defines the interface to a DNS server's custom record list.
//
// ## Implementations
//
// - pi-hole: `namepal-backend-pihole` crate
// - AdGuard Home: `namepal-backend-adguard` crate
//
// ## Usage
//
// ```rust,ignore
// use namepal_core::DnsBackend;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let backend = /* DnsBackend implementation */;
//
//     for entry in backend.list_entries().await? {
//         println!("{} -> {}", entry.domain, entry.ip);
//     }
//     backend.add_entry("grafana.home.lan", "192.168.1.20").await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One custom record currently held by a backend
///
/// Always a fresh snapshot; never cached across reconciliation passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DnsEntry {
    /// Record name (e.g. "grafana.home.lan")
    pub domain: String,
    /// Address the record resolves to
    pub ip: String,
}

impl DnsEntry {
    /// Create a new entry
    pub fn new(domain: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ip: ip.into(),
        }
    }
}

/// Trait for DNS backend implementations
///
/// Three primitive operations, each independently fallible.
///
/// # Trust Level: Untrusted
///
/// Backends are isolated, stateless and single-shot:
///
/// - Perform HTTP calls to their own endpoint only
/// - Never retry, back off or sleep (convergence comes from the next pass)
/// - Never spawn tasks
/// - Never decide *what* to change (owned by `Reconciler`)
///
/// Every failure is returned as a [`BackendError`](crate::error::BackendError)
/// wrapped in [`Error::Backend`](crate::Error::Backend), naming the verb,
/// domain and IP that failed.
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Fetch all custom records currently configured
    async fn list_entries(&self) -> Result<Vec<DnsEntry>, crate::Error>;

    /// Add a `(domain, ip)` record
    ///
    /// # Idempotency
    ///
    /// Adding an exact pair that already exists must not be reported as
    /// an error, even if the backend itself rejects the duplicate.
    async fn add_entry(&self, domain: &str, ip: &str) -> Result<(), crate::Error>;

    /// Delete the record identified by the exact `(domain, ip)` pair
    ///
    /// Deleting a pair that does not exist is not an error.
    async fn delete_entry(&self, domain: &str, ip: &str) -> Result<(), crate::Error>;

    /// Get the backend name (for logging/debugging)
    fn backend_name(&self) -> &'static str;
}

/// Helper trait for constructing DNS backends from configuration
pub trait DnsBackendFactory: Send + Sync {
    /// Create a DnsBackend instance from configuration
    fn create(
        &self,
        config: &crate::config::BackendConfig,
    ) -> Result<Box<dyn DnsBackend>, crate::Error>;
}
