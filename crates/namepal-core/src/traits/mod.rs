//! Core traits for namepal
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DnsBackend`]: List, add and delete custom DNS records
//! - [`WorkloadSource`]: Enumerate workloads and watch their lifecycle events

pub mod dns_backend;
pub mod workload_source;

pub use dns_backend::{DnsBackend, DnsBackendFactory, DnsEntry};
pub use workload_source::{
    WorkloadEvent, WorkloadEventKind, WorkloadEventStream, WorkloadSource, WorkloadSourceFactory,
};
