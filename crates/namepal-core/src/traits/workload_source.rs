// # Workload Source Trait
//
// Defines the interface for enumerating workloads and watching their
// lifecycle events.
//
// ## Implementations
//
// - Docker Engine API: `namepal-source-docker` crate
//
// ## Usage
//
// ```rust,ignore
// use namepal_core::WorkloadSource;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* WorkloadSource implementation */;
//
//     for id in source.list_workloads().await? {
//         let labels = source.inspect_labels(&id).await?;
//         println!("{id}: {} label(s)", labels.len());
//     }
//
//     let mut events = source.events().await?;
//     while let Some(event) = events.next().await {
//         println!("{:?}", event?);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::pin::Pin;
use tokio_stream::Stream;

/// Category of a workload lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadEventKind {
    /// A workload started
    Started,
    /// A workload stopped (exited or was killed)
    Stopped,
    /// A workload's health status changed
    HealthChanged,
    /// Anything else (create, pause, rename, ...)
    Other,
}

impl WorkloadEventKind {
    /// Classify a raw engine action
    ///
    /// Health events come in several sub-kinds (`health_status: healthy`,
    /// `health_status: unhealthy`, ...), so they are matched by prefix.
    pub fn from_action(action: &str) -> Self {
        match action {
            "start" => WorkloadEventKind::Started,
            "die" => WorkloadEventKind::Stopped,
            a if a.starts_with("health_status") => WorkloadEventKind::HealthChanged,
            _ => WorkloadEventKind::Other,
        }
    }

    /// Whether this event may change the set of routable workloads
    pub fn triggers_enumeration(self) -> bool {
        !matches!(self, WorkloadEventKind::Other)
    }
}

/// A workload lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    /// Event category
    pub kind: WorkloadEventKind,
    /// Identifier of the workload the event is about
    pub workload_id: String,
    /// Raw action as reported by the source
    pub action: String,
}

impl WorkloadEvent {
    /// Create a new event, classifying `action`
    pub fn new(workload_id: impl Into<String>, action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            kind: WorkloadEventKind::from_action(&action),
            workload_id: workload_id.into(),
            action,
        }
    }
}

/// Stream of workload events
///
/// An `Err` item is terminal: the subscription failed and will yield nothing
/// further.
pub type WorkloadEventStream =
    Pin<Box<dyn Stream<Item = Result<WorkloadEvent, crate::Error>> + Send + 'static>>;

/// Trait for workload source implementations
///
/// # Trust Level: Semi-Trusted
///
/// Sources perform platform I/O (engine sockets) and may spawn a task to
/// drive the event subscription. They never decide what to publish: that
/// is owned by the `Watcher`.
///
/// - Event tasks must be event-driven, not polling loops
/// - Dropping the event stream must end any task behind it
/// - No retry or reconnect: a broken subscription is reported, not healed
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Name published alongside each desired set (e.g. "docker")
    fn source_name(&self) -> &'static str;

    /// Identifiers of all currently running workloads
    async fn list_workloads(&self) -> Result<Vec<String>, crate::Error>;

    /// Routing metadata (labels) of one workload
    ///
    /// Fails with [`Error::Workload`](crate::Error::Workload) if the workload
    /// disappeared between listing and inspection.
    async fn inspect_labels(&self, id: &str) -> Result<HashMap<String, String>, crate::Error>;

    /// Subscribe to workload-level lifecycle events
    ///
    /// Returns once the subscription is live: every event that happens
    /// after this call completes is delivered on the stream. Failing to
    /// subscribe is an [`Error::WatchSource`](crate::Error::WatchSource).
    async fn events(&self) -> Result<WorkloadEventStream, crate::Error>;
}

/// Helper trait for constructing workload sources from configuration
pub trait WorkloadSourceFactory: Send + Sync {
    /// Create a WorkloadSource instance from configuration
    fn create(
        &self,
        config: &crate::config::SourceConfig,
    ) -> Result<Box<dyn WorkloadSource>, crate::Error>;
}
