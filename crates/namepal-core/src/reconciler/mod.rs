//! Record reconciler
//!
//! The Reconciler converges a backend's custom records onto the desired
//! hostname set of one origin IP:
//! - Re-reading backend state at the start of every pass
//! - Computing the minimal delete/add plan
//! - Executing the plan sequentially, aborting on the first failure
//!
//! ## Event Flow
//!
//! ```text
//! desired set + ip ──► list_entries() ──► plan() ──► delete… ──► add…
//! ```
//!
//! ## Delete Rule
//!
//! An existing entry is deleted when exactly one of these holds:
//!
//! - it maps to the requesting IP and its domain is no longer desired
//!   (release)
//! - it maps to another IP and its domain is now desired by the
//!   requesting IP (ownership transfer)
//!
//! Entries that are neither ours nor wanted belong to someone else and are
//! untouched; entries that are both are already correct.
//!
//! ## Self-Healing
//!
//! No state survives between passes. A pass that fails half way is
//! repaired by the next pass for the same IP, because that pass starts
//! from a fresh read of what the backend actually holds.

use crate::error::{Error, Operation, Result, Verb};
use crate::traits::{DnsBackend, DnsEntry};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of a successful reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Origin IP the pass ran for
    pub ip: String,
    /// Entries removed from the backend
    pub deleted: Vec<DnsEntry>,
    /// Entries submitted to the backend (including already-correct ones)
    pub added: Vec<DnsEntry>,
}

/// Compute the operations that converge `current` onto `desired` for `ip`
///
/// Deletes come first, in the order of `current`, followed by one add per
/// distinct desired domain in the order of `desired`. Adds are issued even
/// for domains that already map to `ip`: the backend contract makes them
/// idempotent.
pub fn plan(current: &[DnsEntry], desired: &[String], ip: &str) -> Vec<Operation> {
    let wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let mut operations = Vec::new();

    for entry in current {
        let found = wanted.contains(entry.domain.as_str());
        let uses_current_ip = entry.ip == ip;
        if found != uses_current_ip {
            operations.push(Operation::delete(&entry.domain, &entry.ip));
        }
    }

    let mut seen = HashSet::new();
    for domain in desired {
        if seen.insert(domain.as_str()) {
            operations.push(Operation::add(domain, ip));
        }
    }

    operations
}

/// Reconciles desired hostname sets against a DNS backend
///
/// ## Concurrency
///
/// Passes for the same origin IP are serialized so that two overlapping
/// requests cannot interleave their read and write phases. Passes for
/// different IPs run concurrently.
pub struct Reconciler {
    /// Backend the records live in
    backend: Arc<dyn DnsBackend>,

    /// Per-origin-IP pass locks
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,

    /// Dry-run mode: read and plan, but skip add/delete calls
    dry_run: bool,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(backend: Arc<dyn DnsBackend>) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
            dry_run: false,
        }
    }

    /// Create a reconciler that only logs the operations it would perform
    pub fn new_dry_run(backend: Arc<dyn DnsBackend>) -> Self {
        Self {
            dry_run: true,
            ..Self::new(backend)
        }
    }

    /// Name of the backend being reconciled
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Run one reconciliation pass for `ip`
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileReport)`: every planned operation succeeded
    /// - `Err(Error::Backend)`: the initial read failed, nothing was changed
    /// - `Err(Error::Reconciliation)`: an add or delete failed; operations
    ///   before it stay applied, the rest were abandoned
    /// - `Err(Error::InvalidInput)`: empty IP or domain
    pub async fn reconcile(&self, ip: &str, desired: &[String]) -> Result<ReconcileReport> {
        if ip.trim().is_empty() {
            return Err(Error::invalid_input("origin IP cannot be empty"));
        }
        if let Some(position) = desired.iter().position(|d| d.trim().is_empty()) {
            return Err(Error::invalid_input(format!(
                "domain #{} of the desired set is empty",
                position
            )));
        }

        let lock = self.lock_for(ip);
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(ip, desired).await
        };
        drop(lock);
        self.release_lock(ip);

        result
    }

    async fn reconcile_locked(&self, ip: &str, desired: &[String]) -> Result<ReconcileReport> {
        let current = self.backend.list_entries().await?;
        debug!(
            ip,
            backend = self.backend.backend_name(),
            current = current.len(),
            desired = desired.len(),
            "Reconciling"
        );

        let operations = plan(&current, desired, ip);
        let mut report = ReconcileReport {
            ip: ip.to_string(),
            ..Default::default()
        };

        for (completed, operation) in operations.into_iter().enumerate() {
            if self.dry_run {
                info!(
                    ip,
                    verb = %operation.verb,
                    domain = %operation.domain,
                    entry_ip = %operation.ip,
                    "[DRY-RUN] Would apply"
                );
            } else {
                self.apply(&operation).await.map_err(|e| {
                    warn!(
                        ip,
                        verb = %operation.verb,
                        domain = %operation.domain,
                        entry_ip = %operation.ip,
                        completed,
                        error = %e,
                        "Reconciliation aborted"
                    );
                    match e {
                        Error::Backend(source) => Error::Reconciliation {
                            operation: operation.clone(),
                            completed,
                            source,
                        },
                        other => other,
                    }
                })?;
            }

            let entry = DnsEntry::new(operation.domain, operation.ip);
            match operation.verb {
                Verb::Delete => report.deleted.push(entry),
                Verb::Add => report.added.push(entry),
                Verb::List => {}
            }
        }

        info!(
            ip,
            deleted = report.deleted.len(),
            added = report.added.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    async fn apply(&self, operation: &Operation) -> Result<()> {
        match operation.verb {
            Verb::Delete => {
                info!(domain = %operation.domain, ip = %operation.ip, "Deleting outdated entry");
                self.backend
                    .delete_entry(&operation.domain, &operation.ip)
                    .await
            }
            Verb::Add => {
                info!(domain = %operation.domain, ip = %operation.ip, "Adding entry");
                self.backend.add_entry(&operation.domain, &operation.ip).await
            }
            Verb::List => Ok(()),
        }
    }

    fn lock_for(&self, ip: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(ip.to_string()).or_default().clone()
    }

    // Drops the lock entry once no pass holds or waits on it.
    fn release_lock(&self, ip: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(ip).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(ip);
        }
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
