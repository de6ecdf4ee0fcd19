// # AdGuard Home DNS Backend
//
// This crate provides an AdGuard Home backend for namepal, managing
// "DNS rewrites" through the control API.
//
// ## Behavior
//
// - One HTTP request per list and delete, two per add (list, then add)
// - A rewrite's `domain` is the record domain, its `answer` is the IP
// - No retry, no backoff, no caching
// - Adding an existing rewrite and deleting a missing one both succeed;
//   an add first reads the rewrite list and is skipped when the exact
//   pair is present, so repeated passes never stack duplicate rewrites
// - Optional HTTP basic auth; the password NEVER appears in logs
//
// ## API Reference
//
// ```http
// GET  <url>/rewrite/list                          -> [{"domain": "...", "answer": "..."}]
// POST <url>/rewrite/add    {"domain": "...", "answer": "..."}
// POST <url>/rewrite/delete {"domain": "...", "answer": "..."}
// ```

use async_trait::async_trait;
use namepal_core::config::BackendConfig;
use namepal_core::error::{BackendError, Error, Result, Verb};
use namepal_core::traits::{DnsBackend, DnsBackendFactory, DnsEntry};
use namepal_core::ComponentRegistry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BACKEND_NAME: &str = "adguard";

/// One DNS rewrite as AdGuard Home models it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Rewrite {
    domain: String,
    answer: String,
}

impl From<Rewrite> for DnsEntry {
    fn from(rewrite: Rewrite) -> Self {
        DnsEntry::new(rewrite.domain, rewrite.answer)
    }
}

/// Basic auth credentials
#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// AdGuard Home DNS backend
pub struct AdguardBackend {
    /// Control API base, without trailing slash
    base_url: String,

    /// Basic auth, if AdGuard Home has users configured
    credentials: Option<Credentials>,

    /// HTTP client for API requests
    client: reqwest::Client,
}

impl std::fmt::Debug for AdguardBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdguardBackend")
            .field("base_url", &self.base_url)
            .field(
                "username",
                &self.credentials.as_ref().map(|c| c.username.as_str()),
            )
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl AdguardBackend {
    /// Create a new AdGuard Home backend
    ///
    /// `url` is the control API base, e.g. `http://adguard.lan/control`.
    /// `username` and `password` must be given together or not at all.
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(Error::config(
                    "adguard username and password must be set together",
                ));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            credentials,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/rewrite/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }

    /// Read every rewrite; errors are returned as plain messages
    async fn fetch_rewrites(&self) -> std::result::Result<Vec<Rewrite>, String> {
        let response = self
            .authorize(self.client.get(self.endpoint("list")))
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(describe_failure(status, &body));
        }

        // AdGuard Home answers `null` when no rewrite exists
        let rewrites: Option<Vec<Rewrite>> = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;
        Ok(rewrites.unwrap_or_default())
    }

    async fn mutate(&self, verb: Verb, domain: &str, ip: &str) -> Result<()> {
        let path = match verb {
            Verb::Add => "add",
            Verb::Delete => "delete",
            Verb::List => "list",
        };
        let rewrite = Rewrite {
            domain: domain.to_string(),
            answer: ip.to_string(),
        };
        let fail = |message: String| BackendError::mutation(BACKEND_NAME, verb, domain, ip, message);

        let response = self
            .authorize(self.client.post(self.endpoint(path)))
            .json(&rewrite)
            .send()
            .await
            .map_err(|e| fail(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        if status.as_u16() == 400 && already_in_state(verb, &body) {
            tracing::debug!(verb = %verb, domain, ip, "Rewrite already in requested state");
            return Ok(());
        }

        Err(fail(describe_failure(status, &body)).into())
    }
}

/// Whether a 400 body says the rewrite is already in the requested state
fn already_in_state(verb: Verb, body: &str) -> bool {
    let body = body.to_lowercase();
    match verb {
        Verb::Add => body.contains("already exists"),
        Verb::Delete => body.contains("not found") || body.contains("does not exist"),
        Verb::List => false,
    }
}

fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 | 403 => format!("Authentication failed: check username and password. Status: {}", status),
        500..=599 => format!("AdGuard Home server error (transient): {} - {}", status, body.trim()),
        _ => format!("Request failed: {} - {}", status, body.trim()),
    }
}

#[async_trait]
impl DnsBackend for AdguardBackend {
    async fn list_entries(&self) -> Result<Vec<DnsEntry>> {
        let rewrites = self
            .fetch_rewrites()
            .await
            .map_err(|message| BackendError::list(BACKEND_NAME, message))?;

        let entries: Vec<DnsEntry> = rewrites.into_iter().map(DnsEntry::from).collect();
        tracing::debug!(count = entries.len(), "Fetched AdGuard Home rewrites");
        Ok(entries)
    }

    async fn add_entry(&self, domain: &str, ip: &str) -> Result<()> {
        let existing = self.fetch_rewrites().await.map_err(|message| {
            BackendError::mutation(BACKEND_NAME, Verb::Add, domain, ip, message)
        })?;

        if existing
            .iter()
            .any(|rewrite| rewrite.domain == domain && rewrite.answer == ip)
        {
            tracing::debug!(domain, ip, "Rewrite already present");
            return Ok(());
        }

        self.mutate(Verb::Add, domain, ip).await
    }

    async fn delete_entry(&self, domain: &str, ip: &str) -> Result<()> {
        self.mutate(Verb::Delete, domain, ip).await
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}

/// Factory for creating AdGuard Home backends
pub struct AdguardFactory;

impl DnsBackendFactory for AdguardFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DnsBackend>> {
        match config {
            BackendConfig::Adguard {
                url,
                username,
                password,
                timeout_secs,
            } => Ok(Box::new(AdguardBackend::new(
                url,
                username.clone(),
                password.clone(),
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for adguard backend")),
        }
    }
}

/// Register the AdGuard Home backend with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_backend(BACKEND_NAME, Box::new(AdguardFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned responses, one per connection, recording raw requests
    async fn fake_adguard(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 8192];
                let mut request = String::new();
                // Headers and the small JSON body arrive together or in two reads
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if n == 0 || request_complete(&request) {
                        break;
                    }
                }
                recorded.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });

        (format!("http://{}/control/", addr), seen)
    }

    fn request_complete(request: &str) -> bool {
        let Some((head, body)) = request.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn backend(url: &str) -> AdguardBackend {
        AdguardBackend::new(url, None, None, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_rewrite_maps_answer_to_ip() {
        let rewrite: Rewrite =
            serde_json::from_str(r#"{"domain": "nas.lan", "answer": "10.0.0.5"}"#).unwrap();
        assert_eq!(DnsEntry::from(rewrite), DnsEntry::new("nas.lan", "10.0.0.5"));
    }

    #[test]
    fn test_endpoints_strip_trailing_slash() {
        let backend = backend("http://adguard.lan/control/");
        assert_eq!(backend.endpoint("list"), "http://adguard.lan/control/rewrite/list");
    }

    #[test]
    fn test_already_in_state() {
        assert!(already_in_state(Verb::Add, "rewrite already exists"));
        assert!(already_in_state(Verb::Delete, "rewrite not found"));
        assert!(!already_in_state(Verb::Add, "invalid answer"));
    }

    #[test]
    fn test_credentials_must_be_paired() {
        assert!(
            AdguardBackend::new("http://a/control", Some("admin".into()), None, Duration::from_secs(1))
                .is_err()
        );
    }

    #[test]
    fn test_password_not_exposed_in_debug() {
        let backend = AdguardBackend::new(
            "http://adguard.lan/control",
            Some("admin".into()),
            Some("hunter2".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug_str = format!("{:?}", backend);
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("admin"));
    }

    #[test]
    fn test_factory() {
        let config = BackendConfig::Adguard {
            url: "http://adguard.lan/control".to_string(),
            username: None,
            password: None,
            timeout_secs: 10,
        };
        assert!(AdguardFactory.create(&config).is_ok());

        let registry = ComponentRegistry::new();
        register(&registry);
        assert!(registry.create_backend(&config).is_ok());
    }

    #[tokio::test]
    async fn test_list_against_server() {
        let (url, seen) = fake_adguard(vec![(
            200,
            r#"[{"domain": "nas.lan", "answer": "10.0.0.5"}, {"domain": "*.dev.lan", "answer": "10.0.0.7"}]"#,
        )])
        .await;

        let entries = backend(&url).list_entries().await.unwrap();

        assert_eq!(
            entries,
            vec![DnsEntry::new("nas.lan", "10.0.0.5"), DnsEntry::new("*.dev.lan", "10.0.0.7")]
        );
        assert!(seen.lock().unwrap()[0].starts_with("GET /control/rewrite/list "));
    }

    #[tokio::test]
    async fn test_null_list_is_empty() {
        let (url, _seen) = fake_adguard(vec![(200, "null")]).await;
        assert!(backend(&url).list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_delete_post_rewrites() {
        let (url, seen) = fake_adguard(vec![(200, "null"), (200, ""), (400, "rewrite not found")]).await;
        let backend = AdguardBackend::new(
            &url,
            Some("admin".into()),
            Some("hunter2".into()),
            Duration::from_secs(2),
        )
        .unwrap();

        backend.add_entry("web.lan", "10.0.0.2").await.unwrap();
        backend.delete_entry("old.lan", "10.0.0.2").await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("GET /control/rewrite/list "));
        assert!(seen[1].starts_with("POST /control/rewrite/add "));
        assert!(seen[1].contains(r#"{"domain":"web.lan","answer":"10.0.0.2"}"#));
        assert!(seen[1].to_lowercase().contains("authorization: basic "));
        assert!(seen[2].starts_with("POST /control/rewrite/delete "));
    }

    #[tokio::test]
    async fn test_rejected_add_is_backend_error() {
        let (url, _seen) = fake_adguard(vec![(200, "[]"), (400, "invalid answer")]).await;

        let err = backend(&url).add_entry("web.lan", "nope").await.unwrap_err();

        let backend_err = err.backend_error().expect("backend error");
        assert_eq!(backend_err.backend, "adguard");
        assert_eq!(backend_err.verb, Verb::Add);
        assert!(backend_err.message.contains("invalid answer"));
    }

    #[tokio::test]
    async fn test_add_skips_existing_pair() {
        let (url, seen) = fake_adguard(vec![(
            200,
            r#"[{"domain": "web.lan", "answer": "10.0.0.2"}, {"domain": "web.lan", "answer": "10.0.0.9"}]"#,
        )])
        .await;

        backend(&url).add_entry("web.lan", "10.0.0.2").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("GET /control/rewrite/list "));
    }

    #[tokio::test]
    async fn test_add_reports_unreadable_list_as_add_failure() {
        let (url, _seen) = fake_adguard(vec![(503, "busy")]).await;

        let err = backend(&url).add_entry("web.lan", "10.0.0.2").await.unwrap_err();

        let backend_err = err.backend_error().expect("backend error");
        assert_eq!(backend_err.verb, Verb::Add);
        assert_eq!(backend_err.domain.as_deref(), Some("web.lan"));
    }
}
