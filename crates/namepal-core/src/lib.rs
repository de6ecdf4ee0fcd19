// # namepal-core
//
// Core library keeping a DNS server's custom records in sync with the
// hostnames routed by running containers.
//
// ## Architecture Overview
//
// - **DnsBackend**: Trait for listing, adding and deleting custom records
// - **WorkloadSource**: Trait for enumerating workloads and watching lifecycle events
// - **Reconciler**: Converges backend records onto one origin IP's desired set
// - **Watcher**: Derives desired sets from workload labels and hands them off
// - **ComponentRegistry**: Plugin-based registry for backends and sources
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from backend/source implementations
// 2. **Event-Driven**: The watcher reacts to lifecycle events, it never polls
// 3. **Stateless**: Every reconciliation re-reads the backend; nothing is cached
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Self-Healing**: A failed pass is repaired by the next one, no retry loops

pub mod config;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod traits;
pub mod watcher;

// Re-export core types for convenience
pub use config::{AgentConfig, BackendConfig, ManagerConfig, SourceConfig, WatcherConfig};
pub use error::{BackendError, Error, Operation, Result, Verb};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::ComponentRegistry;
pub use traits::{DnsBackend, DnsEntry, WorkloadEvent, WorkloadEventKind, WorkloadSource};
pub use watcher::{HostnameMatcher, ProviderParams, Watcher, handoff_channel};
