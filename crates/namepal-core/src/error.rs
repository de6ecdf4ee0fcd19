//! Error types for namepal
//!
//! This module defines all error types used throughout the crate.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for namepal operations
pub type Result<T> = std::result::Result<T, Error>;

/// The primitive backend operation a failure or plan step refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Listing all custom records
    List,
    /// Adding a `(domain, ip)` record
    Add,
    /// Deleting a `(domain, ip)` record
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::List => "list",
            Verb::Add => "add",
            Verb::Delete => "delete",
        })
    }
}

/// A failed call against a DNS backend
///
/// Carries the identity of the failed operation so it can be logged
/// without replaying the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{backend} {verb} failed (domain: {}, ip: {}): {message}",
    .domain.as_deref().unwrap_or("-"), .ip.as_deref().unwrap_or("-"))]
pub struct BackendError {
    /// Backend name (e.g. "pihole")
    pub backend: &'static str,
    /// Failed operation
    pub verb: Verb,
    /// Domain of the failed operation, if any
    pub domain: Option<String>,
    /// IP of the failed operation, if any
    pub ip: Option<String>,
    /// Human readable cause
    pub message: String,
}

impl BackendError {
    /// A failure of the list operation
    pub fn list(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            verb: Verb::List,
            domain: None,
            ip: None,
            message: message.into(),
        }
    }

    /// A failure of an add or delete operation on `(domain, ip)`
    pub fn mutation(
        backend: &'static str,
        verb: Verb,
        domain: &str,
        ip: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            verb,
            domain: Some(domain.to_string()),
            ip: Some(ip.to_string()),
            message: message.into(),
        }
    }
}

/// One step of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Operation {
    /// What the step does
    pub verb: Verb,
    /// Domain the step touches
    pub domain: String,
    /// IP the step touches
    pub ip: String,
}

impl Operation {
    /// An add step
    pub fn add(domain: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            verb: Verb::Add,
            domain: domain.into(),
            ip: ip.into(),
        }
    }

    /// A delete step
    pub fn delete(domain: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            verb: Verb::Delete,
            domain: domain.into(),
            ip: ip.into(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.verb, self.domain, self.ip)
    }
}

/// Core error type for namepal
#[derive(Error, Debug)]
pub enum Error {
    /// Unreadable or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A DNS backend call failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A reconciliation pass was aborted part way through
    #[error("Reconciliation aborted at `{operation}` after {completed} completed operation(s): {source}")]
    Reconciliation {
        /// The step that failed
        operation: Operation,
        /// Number of steps that succeeded before the failure
        completed: usize,
        /// Underlying backend failure
        #[source]
        source: BackendError,
    },

    /// Sending a registration to the manager failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The workload event subscription failed or terminated
    #[error("Watch source error: {0}")]
    WatchSource(String),

    /// A single workload could not be listed or inspected
    #[error("Workload error ({id}): {message}")]
    Workload {
        /// Workload identifier
        id: String,
        /// Error message
        message: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a watch source error
    pub fn watch_source(msg: impl Into<String>) -> Self {
        Self::WatchSource(msg.into())
    }

    /// Create a per-workload error
    pub fn workload(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workload {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// The backend failure behind this error, if there is one
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(e) => Some(e),
            Error::Reconciliation { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_names_the_failed_operation() {
        let err = BackendError::mutation("pihole", Verb::Delete, "a.com", "1.1.1.1", "timed out");
        let text = err.to_string();
        assert!(text.contains("pihole"));
        assert!(text.contains("delete"));
        assert!(text.contains("a.com"));
        assert!(text.contains("1.1.1.1"));
        assert!(text.contains("timed out"));
    }

    #[test]
    fn list_error_has_no_domain() {
        let err = BackendError::list("adguard", "connection refused");
        assert_eq!(err.domain, None);
        assert_eq!(err.to_string(), "adguard list failed (domain: -, ip: -): connection refused");
    }

    #[test]
    fn reconciliation_error_exposes_backend_cause() {
        let source = BackendError::mutation("pihole", Verb::Add, "b.com", "2.2.2.2", "500");
        let err = Error::Reconciliation {
            operation: Operation::add("b.com", "2.2.2.2"),
            completed: 1,
            source: source.clone(),
        };
        assert_eq!(err.backend_error(), Some(&source));
        assert!(err.to_string().contains("add b.com -> 2.2.2.2"));
    }
}
