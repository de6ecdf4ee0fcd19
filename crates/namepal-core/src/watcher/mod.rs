//! Workload watcher
//!
//! The Watcher is responsible for:
//! - Enumerating running workloads on cold start
//! - Re-enumerating whenever a lifecycle event may have changed the set
//! - Extracting hostnames from each workload's routing labels
//! - Publishing the desired set on the hand-off channel
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ WorkloadSource │─── WorkloadEvent ───┐
//! └────────────────┘                     │
//!                                        ▼
//!                               ┌──────────────┐
//!                               │   Watcher    │ list + inspect + extract
//!                               └──────────────┘
//!                                        │ ProviderParams
//!                                        ▼
//!                               ┌──────────────┐
//!                               │  hand-off    │ capacity 1, send().await
//!                               └──────────────┘
//!                                        │
//!                                        ▼
//!                               registration sender
//! ```
//!
//! ## Back-pressure
//!
//! The hand-off channel holds a single message. The watcher awaits each
//! send before reading the next event, so a slow consumer slows the
//! watcher down instead of desired sets being dropped or reordered.
//!
//! ## One Message Per Pass
//!
//! Each enumeration accumulates the hostnames of all workloads and sends
//! them as one message. The consumer only ever sees complete sets.

pub mod hostnames;

pub use hostnames::HostnameMatcher;

use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::traits::WorkloadSource;
use std::collections::BTreeSet;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the hand-off channel between watcher and consumer
pub const HANDOFF_CAPACITY: usize = 1;

/// Desired hostname set published by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderParams {
    /// Name of the workload source that produced the set
    pub provider_name: String,
    /// Sorted, deduplicated hostnames
    pub domains: Vec<String>,
}

/// Create the hand-off channel a [`Watcher`] publishes on
pub fn handoff_channel() -> (mpsc::Sender<ProviderParams>, mpsc::Receiver<ProviderParams>) {
    mpsc::channel(HANDOFF_CAPACITY)
}

enum Flow {
    Continue,
    Stop,
}

/// Watches a workload source and publishes desired hostname sets
///
/// ## Lifecycle
///
/// 1. Create with [`Watcher::new()`]
/// 2. Run with [`Watcher::run_with_shutdown()`]
/// 3. Returns `Ok(())` on shutdown or when the consumer goes away
/// 4. Returns `Err(Error::WatchSource)` when the event subscription breaks;
///    there is no reconnect, the owning process is expected to restart
pub struct Watcher {
    /// Where workloads and events come from
    source: Box<dyn WorkloadSource>,

    /// Label matcher
    matcher: HostnameMatcher,

    /// Publish sets equal to the previous one
    emit_unchanged: bool,
}

impl Watcher {
    /// Create a new watcher
    pub fn new(source: Box<dyn WorkloadSource>, config: &WatcherConfig) -> Self {
        Self {
            source,
            matcher: HostnameMatcher::from_config(config),
            emit_unchanged: config.emit_unchanged,
        }
    }

    /// Run one full enumeration pass
    ///
    /// Workloads that fail inspection (typically because they were removed
    /// after listing) are skipped. Only a failure to list at all is
    /// returned as an error.
    pub async fn enumerate(&self) -> Result<Vec<String>> {
        let ids = self.source.list_workloads().await?;
        let mut domains = BTreeSet::new();

        for id in &ids {
            match self.source.inspect_labels(id).await {
                Ok(labels) => {
                    let found = self.matcher.extract(&labels);
                    if !found.is_empty() {
                        debug!(workload = %short_id(id), hosts = ?found, "Found matching workload");
                    }
                    domains.extend(found);
                }
                Err(e) => {
                    warn!(workload = %short_id(id), error = %e, "Skipping workload");
                }
            }
        }

        debug!(workloads = ids.len(), domains = domains.len(), "Enumeration complete");
        Ok(domains.into_iter().collect())
    }

    /// Run the watcher until `shutdown_rx` fires
    ///
    /// The event subscription is established first and the cold-start
    /// enumeration runs right after, so workloads that start while the
    /// enumeration is in flight are still seen. Failing to subscribe is
    /// returned as `Error::WatchSource` before anything is published.
    ///
    /// Dropping the sender half of `shutdown_rx` counts as a shutdown.
    pub async fn run_with_shutdown(
        &self,
        tx: mpsc::Sender<ProviderParams>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<()> {
        let mut events = self.source.events().await.map_err(|e| {
            error!(error = %e, "Event subscription failed");
            match e {
                Error::WatchSource(_) => e,
                other => Error::watch_source(other.to_string()),
            }
        })?;
        let mut last_sent: Option<Vec<String>> = None;

        info!(source = self.source.source_name(), "Watcher started");

        if let Flow::Stop = self.publish(&tx, &mut last_sent, &mut shutdown_rx).await {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received, watcher stopped");
                    return Ok(());
                }

                next = events.next() => match next {
                    Some(Ok(event)) if event.kind.triggers_enumeration() => {
                        debug!(
                            workload = %short_id(&event.workload_id),
                            action = %event.action,
                            "Lifecycle event"
                        );
                        if let Flow::Stop = self.publish(&tx, &mut last_sent, &mut shutdown_rx).await {
                            return Ok(());
                        }
                    }
                    Some(Ok(event)) => {
                        trace!(action = %event.action, "Ignoring event");
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Event subscription failed");
                        return Err(if matches!(e, Error::WatchSource(_)) {
                            e
                        } else {
                            Error::watch_source(e.to_string())
                        });
                    }
                    None => {
                        error!("Event subscription ended");
                        return Err(Error::watch_source("event stream ended unexpectedly"));
                    }
                }
            }
        }
    }

    async fn publish(
        &self,
        tx: &mpsc::Sender<ProviderParams>,
        last_sent: &mut Option<Vec<String>>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> Flow {
        let domains = match self.enumerate().await {
            Ok(domains) => domains,
            Err(e) => {
                error!(error = %e, "Failed to enumerate workloads, skipping pass");
                return Flow::Continue;
            }
        };

        if !self.emit_unchanged && last_sent.as_ref() == Some(&domains) {
            debug!("Desired set unchanged, not publishing");
            return Flow::Continue;
        }

        let params = ProviderParams {
            provider_name: self.source.source_name().to_string(),
            domains: domains.clone(),
        };

        tokio::select! {
            sent = tx.send(params) => {
                if sent.is_err() {
                    info!("Consumer dropped, watcher stopped");
                    return Flow::Stop;
                }
                *last_sent = Some(domains);
                Flow::Continue
            }
            _ = shutdown_rx => {
                info!("Shutdown signal received while publishing, watcher stopped");
                Flow::Stop
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
