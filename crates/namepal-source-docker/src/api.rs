//! Docker Engine API wire types (minimal subset)

use bytes::{Buf, BytesMut};
use namepal_core::traits::WorkloadEvent;
use namepal_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// A running container returned by `GET /containers/json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    /// Full container ID
    pub id: String,
}

/// The parts of `GET /containers/{id}/json` we read
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    #[serde(default)]
    pub config: Option<ContainerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// `null` when the image and container define no labels
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl ContainerInspect {
    /// Container labels, empty when none are set
    pub fn into_labels(self) -> HashMap<String, String> {
        self.config.and_then(|c| c.labels).unwrap_or_default()
    }
}

/// One line of `GET /events`
///
/// Newer daemons fill `Type`/`Action`/`Actor`, older ones only the
/// lowercase `status`/`id` pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "Action", default)]
    pub action: Option<String>,
    #[serde(rename = "Actor", default)]
    pub actor: Option<EventActor>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventActor {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

impl EventMessage {
    /// Convert to a workload event; `None` for non-container events
    pub fn into_workload_event(self) -> Option<WorkloadEvent> {
        if self.kind.as_deref().is_some_and(|kind| kind != "container") {
            return None;
        }
        let action = self.action.or(self.status)?;
        let id = self
            .actor
            .and_then(|actor| actor.id)
            .or(self.id)
            .unwrap_or_default();
        Some(WorkloadEvent::new(id, action))
    }
}

/// Longest event line accepted before the stream is considered broken
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a chunked byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk
    ///
    /// Fails once more than [`MAX_LINE_BYTES`] are buffered without a
    /// newline.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_LINE_BYTES && !self.buf.contains(&b'\n') {
            return Err(Error::watch_source(format!(
                "Docker event line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }
        Ok(())
    }

    /// Take the next complete, non-empty line (without the newline)
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n')?;
            let line = self.buf.split_to(newline);
            self.buf.advance(1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }
}
