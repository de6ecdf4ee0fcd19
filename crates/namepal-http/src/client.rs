//! Registration client

use crate::{REGISTER_PATH, RegisterBody};
use namepal_core::{Error, Result};
use std::time::Duration;

/// Posts desired hostname sets to a manager
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    /// Full registration URL
    url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl RegistrationClient {
    /// Create a client for the manager at `endpoint` (e.g. `http://manager.lan:8000`)
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: format!("{}{}", endpoint.trim_end_matches('/'), REGISTER_PATH),
            client,
        })
    }

    /// Registration URL requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register `domains` as the complete desired set of this host
    ///
    /// An empty set is sent as well: it releases every record the host
    /// previously held.
    pub async fn register(&self, domains: &[String]) -> Result<()> {
        let body = RegisterBody {
            data: domains.to_vec(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::transport(format!(
                "Manager rejected registration: {} - {}",
                status,
                text.trim()
            )));
        }

        tracing::info!(domains = domains.len(), "Registered desired set");
        Ok(())
    }
}
