// # pi-hole DNS Backend
//
// This crate provides a pi-hole backend for namepal, driving the
// "Local DNS Records" list through the legacy `admin/api.php` endpoint.
//
// ## Behavior
//
// - One HTTP request per primitive operation (list, add, delete)
// - No retry, no backoff, no caching: a failed pass is repaired by the next one
// - HTTP timeout configured per client (default 10 seconds)
// - Adding an existing record and deleting a missing one both succeed
//
// ## Security Requirements
//
// - The API token NEVER appears in logs or error messages
// - Request URLs carry the token, so they are never logged either
//
// ## API Reference
//
// All three operations are `GET` requests with query parameters:
//
// ```text
// <url>?auth=<token>&customdns=&action=get
// <url>?auth=<token>&customdns=&action=add&domain=<d>&ip=<ip>
// <url>?auth=<token>&customdns=&action=delete&domain=<d>&ip=<ip>
// ```

use async_trait::async_trait;
use namepal_core::config::BackendConfig;
use namepal_core::error::{BackendError, Error, Result, Verb};
use namepal_core::traits::{DnsBackend, DnsBackendFactory, DnsEntry};
use namepal_core::ComponentRegistry;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

const BACKEND_NAME: &str = "pihole";

/// pi-hole DNS backend
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct PiholeBackend {
    /// `admin/api.php` endpoint
    url: Url,

    /// API token
    /// ⚠️ NEVER log this value
    token: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for PiholeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiholeBackend")
            .field("url", &self.url.as_str())
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// Body of `action=get`
#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<Vec<String>>,
}

/// Body of `action=add` and `action=delete`
#[derive(Debug, Deserialize)]
struct MutationResponse {
    success: bool,
    #[serde(default)]
    message: String,
}

impl PiholeBackend {
    /// Create a new pi-hole backend
    ///
    /// # Parameters
    ///
    /// - `url`: the `admin/api.php` endpoint
    /// - `token`: API token (Settings > API)
    /// - `timeout`: per-request timeout
    pub fn new(url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("Invalid pihole url: {}", e)))?;

        let token = token.into();
        if token.is_empty() {
            return Err(Error::config("pihole token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { url, token, client })
    }

    /// Build the request URL for `action` with extra query pairs
    fn action_url(&self, action: &str, extra: &[(&str, &str)]) -> Url {
        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("auth", &self.token)
                .append_pair("customdns", "")
                .append_pair("action", action);
            for (key, value) in extra {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Issue a GET and return the body of a 2xx response
    async fn get(&self, url: Url) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            // reqwest errors embed the URL, which carries the token
            .await
            .map_err(|e| format!("HTTP request failed: {}", e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => format!("Authentication failed. Status: {}", status),
                500..=599 => format!("pi-hole server error (transient): {} - {}", status, body),
                _ => format!("Request failed: {} - {}", status, body),
            });
        }

        Ok(body)
    }

    async fn mutate(&self, verb: Verb, domain: &str, ip: &str) -> Result<()> {
        let action = match verb {
            Verb::Add => "add",
            Verb::Delete => "delete",
            Verb::List => "get",
        };
        let url = self.action_url(action, &[("domain", domain), ("ip", ip)]);

        let body = self
            .get(url)
            .await
            .map_err(|message| BackendError::mutation(BACKEND_NAME, verb, domain, ip, message))?;

        interpret_mutation(verb, &body)
            .map_err(|message| BackendError::mutation(BACKEND_NAME, verb, domain, ip, message))?;
        Ok(())
    }
}

/// Parse an `action=get` body into entries
fn parse_list(body: &str) -> std::result::Result<Vec<DnsEntry>, String> {
    let response: ListResponse = serde_json::from_str(body)
        .map_err(|e| format!("Unexpected list response (token rejected?): {}", e))?;

    response
        .data
        .into_iter()
        .map(|row| match row.as_slice() {
            [domain, ip, ..] => Ok(DnsEntry::new(domain.as_str(), ip.as_str())),
            _ => Err(format!("Malformed record row: {:?}", row)),
        })
        .collect()
}

/// Decide whether an add/delete body means success
///
/// pi-hole answers `{"success": false}` when the exact record already
/// exists (add) or does not exist (delete). Both mean the record is
/// already in the requested state.
fn interpret_mutation(verb: Verb, body: &str) -> std::result::Result<(), String> {
    let response: MutationResponse = serde_json::from_str(body)
        .map_err(|e| format!("Unexpected {} response (token rejected?): {}", verb, e))?;

    if response.success {
        return Ok(());
    }

    let message = response.message.to_lowercase();
    let already_done = match verb {
        Verb::Add => message.contains("already"),
        Verb::Delete => message.contains("does not exist"),
        Verb::List => false,
    };

    if already_done {
        tracing::debug!(verb = %verb, message = %response.message, "Record already in requested state");
        Ok(())
    } else {
        Err(response.message)
    }
}

#[async_trait]
impl DnsBackend for PiholeBackend {
    async fn list_entries(&self) -> Result<Vec<DnsEntry>> {
        let body = self
            .get(self.action_url("get", &[]))
            .await
            .map_err(|message| BackendError::list(BACKEND_NAME, message))?;

        let entries = parse_list(&body).map_err(|message| BackendError::list(BACKEND_NAME, message))?;
        tracing::debug!(count = entries.len(), "Fetched pi-hole records");
        Ok(entries)
    }

    async fn add_entry(&self, domain: &str, ip: &str) -> Result<()> {
        self.mutate(Verb::Add, domain, ip).await
    }

    async fn delete_entry(&self, domain: &str, ip: &str) -> Result<()> {
        self.mutate(Verb::Delete, domain, ip).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}

/// Factory for creating pi-hole backends
pub struct PiholeFactory;

impl DnsBackendFactory for PiholeFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DnsBackend>> {
        match config {
            BackendConfig::Pihole {
                url,
                token,
                timeout_secs,
            } => Ok(Box::new(PiholeBackend::new(
                url,
                token.clone(),
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for pihole backend")),
        }
    }
}

/// Register the pi-hole backend with a registry
///
/// # Example
///
/// ```rust
/// use namepal_core::ComponentRegistry;
///
/// let registry = ComponentRegistry::new();
/// namepal_backend_pihole::register(&registry);
/// assert!(registry.has_backend("pihole"));
/// ```
pub fn register(registry: &ComponentRegistry) {
    registry.register_backend(BACKEND_NAME, Box::new(PiholeFactory));
}
