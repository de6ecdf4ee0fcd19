//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that record what the core
//! asks of them, without implementing real functionality.

#![allow(dead_code)]

use namepal_core::error::{BackendError, Error, Result, Verb};
use namepal_core::traits::{
    DnsBackend, DnsEntry, WorkloadEvent, WorkloadEventStream, WorkloadSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// A backend call as observed by [`InMemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Add(String, String),
    Delete(String, String),
}

impl Call {
    pub fn add(domain: &str, ip: &str) -> Self {
        Call::Add(domain.to_string(), ip.to_string())
    }

    pub fn delete(domain: &str, ip: &str) -> Self {
        Call::Delete(domain.to_string(), ip.to_string())
    }
}

/// An in-memory backend that behaves like pi-hole's record list
///
/// - add of an existing exact pair is a silent no-op
/// - delete of a missing pair is a silent no-op
/// - any call can be made to fail via [`InMemoryBackend::fail_on`]
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    records: Arc<std::sync::Mutex<Vec<DnsEntry>>>,
    calls: Arc<std::sync::Mutex<Vec<Call>>>,
    fail_on: Arc<std::sync::Mutex<Option<Call>>>,
    list_delay: Arc<std::sync::Mutex<Option<Duration>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with `(domain, ip)` records
    pub fn with_records(pairs: &[(&str, &str)]) -> Self {
        let backend = Self::new();
        *backend.records.lock().unwrap() =
            pairs.iter().map(|(d, ip)| DnsEntry::new(*d, *ip)).collect();
        backend
    }

    /// Make the given call fail every time it is issued
    pub fn fail_on(&self, call: Call) {
        *self.fail_on.lock().unwrap() = Some(call);
    }

    /// Stop failing
    pub fn heal(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    /// Slow down list_entries() (to widen read/write races)
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    /// Current records, sorted
    pub fn records(&self) -> Vec<DnsEntry> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort();
        records
    }

    /// Every call issued so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls issued so far, in order
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// IPs a domain currently resolves to
    pub fn ips_for(&self, domain: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|e| e.domain == domain)
            .map(|e| e.ip)
            .collect()
    }

    fn record(&self, call: Call) -> std::result::Result<(), ()> {
        self.calls.lock().unwrap().push(call.clone());
        if self.fail_on.lock().unwrap().as_ref() == Some(&call) {
            Err(())
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DnsBackend for InMemoryBackend {
    async fn list_entries(&self) -> Result<Vec<DnsEntry>> {
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::List)
            .map_err(|_| BackendError::list("memory", "injected failure"))?;
        Ok(self.records.lock().unwrap().clone())
    }

    async fn add_entry(&self, domain: &str, ip: &str) -> Result<()> {
        self.record(Call::add(domain, ip)).map_err(|_| {
            BackendError::mutation("memory", Verb::Add, domain, ip, "injected failure")
        })?;
        let entry = DnsEntry::new(domain, ip);
        let mut records = self.records.lock().unwrap();
        if !records.contains(&entry) {
            records.push(entry);
        }
        Ok(())
    }

    async fn delete_entry(&self, domain: &str, ip: &str) -> Result<()> {
        self.record(Call::delete(domain, ip)).map_err(|_| {
            BackendError::mutation("memory", Verb::Delete, domain, ip, "injected failure")
        })?;
        let entry = DnsEntry::new(domain, ip);
        self.records.lock().unwrap().retain(|e| e != &entry);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// A workload source whose workloads and events are driven by the test
pub struct ControlledSource {
    workloads: Arc<std::sync::Mutex<Vec<(String, HashMap<String, String>)>>>,
    broken: Arc<std::sync::Mutex<Vec<String>>>,
    fail_listing: Arc<std::sync::atomic::AtomicBool>,
    fail_subscribe: Arc<std::sync::atomic::AtomicBool>,
    first_list_subscribed: Arc<std::sync::atomic::AtomicBool>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Result<WorkloadEvent>>>>,
    list_calls: Arc<AtomicUsize>,
    events_calls: Arc<AtomicUsize>,
}

/// Test-side handle of a [`ControlledSource`]
#[derive(Clone)]
pub struct SourceHandle {
    workloads: Arc<std::sync::Mutex<Vec<(String, HashMap<String, String>)>>>,
    broken: Arc<std::sync::Mutex<Vec<String>>>,
    fail_listing: Arc<std::sync::atomic::AtomicBool>,
    fail_subscribe: Arc<std::sync::atomic::AtomicBool>,
    first_list_subscribed: Arc<std::sync::atomic::AtomicBool>,
    events_tx: mpsc::UnboundedSender<Result<WorkloadEvent>>,
    list_calls: Arc<AtomicUsize>,
    events_calls: Arc<AtomicUsize>,
}

impl ControlledSource {
    pub fn new() -> (Self, SourceHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let workloads = Arc::new(std::sync::Mutex::new(Vec::new()));
        let broken = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fail_listing = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fail_subscribe = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let first_list_subscribed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let list_calls = Arc::new(AtomicUsize::new(0));
        let events_calls = Arc::new(AtomicUsize::new(0));

        let source = Self {
            workloads: workloads.clone(),
            broken: broken.clone(),
            fail_listing: fail_listing.clone(),
            fail_subscribe: fail_subscribe.clone(),
            first_list_subscribed: first_list_subscribed.clone(),
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            list_calls: list_calls.clone(),
            events_calls: events_calls.clone(),
        };
        let handle = SourceHandle {
            workloads,
            broken,
            fail_listing,
            fail_subscribe,
            first_list_subscribed,
            events_tx,
            list_calls,
            events_calls,
        };
        (source, handle)
    }
}

impl SourceHandle {
    /// Start a workload routing `hosts` (one router label per host)
    pub fn start(&self, id: &str, hosts: &[&str]) {
        let labels = hosts
            .iter()
            .enumerate()
            .map(|(i, host)| {
                (
                    format!("traefik.http.routers.r{}.rule", i),
                    format!("Host(`{}`)", host),
                )
            })
            .chain(std::iter::once((
                "traefik.enable".to_string(),
                "true".to_string(),
            )))
            .collect();
        self.workloads.lock().unwrap().push((id.to_string(), labels));
    }

    /// Stop a workload
    pub fn stop(&self, id: &str) {
        self.workloads.lock().unwrap().retain(|(w, _)| w != id);
    }

    /// Make inspection of `id` fail (as if it vanished after listing)
    pub fn break_inspection(&self, id: &str) {
        self.broken.lock().unwrap().push(id.to_string());
    }

    pub fn set_listing_fails(&self, fails: bool) {
        self.fail_listing.store(fails, Ordering::SeqCst);
    }

    pub fn refuse_subscription(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, id: &str, action: &str) {
        let _ = self.events_tx.send(Ok(WorkloadEvent::new(id, action)));
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.events_tx.send(Err(Error::watch_source(message)));
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Whether the subscription existed when the first listing ran
    pub fn first_list_was_subscribed(&self) -> bool {
        self.first_list_subscribed.load(Ordering::SeqCst)
    }

    pub fn events_calls(&self) -> usize {
        self.events_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WorkloadSource for ControlledSource {
    fn source_name(&self) -> &'static str {
        "controlled"
    }

    async fn list_workloads(&self) -> Result<Vec<String>> {
        if self.list_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.first_list_subscribed
                .store(self.events_calls.load(Ordering::SeqCst) > 0, Ordering::SeqCst);
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::watch_source("listing failed"));
        }
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn inspect_labels(&self, id: &str) -> Result<HashMap<String, String>> {
        if self.broken.lock().unwrap().iter().any(|b| b == id) {
            return Err(Error::workload(id, "no such container"));
        }
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .find(|(w, _)| w == id)
            .map(|(_, labels)| labels.clone())
            .ok_or_else(|| Error::workload(id, "no such container"))
    }

    async fn events(&self) -> Result<WorkloadEventStream> {
        self.events_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(Error::watch_source("subscription refused"));
        }
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("events() can only be called once");
        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }
}

/// Strings from string slices
pub fn domains(names: &[&str]) -> Vec<String> {
    names.iter().map(|d| d.to_string()).collect()
}

/// Sorted entries from `(domain, ip)` pairs
pub fn entries(pairs: &[(&str, &str)]) -> Vec<DnsEntry> {
    let mut entries: Vec<DnsEntry> = pairs.iter().map(|(d, ip)| DnsEntry::new(*d, *ip)).collect();
    entries.sort();
    entries
}
