// # Docker Workload Source
//
// This crate provides a Docker Engine workload source for namepal.
//
// ## Architecture
//
// - `list_workloads`: `GET /containers/json` (running containers only)
// - `inspect_labels`: `GET /containers/{id}/json`, reading `Config.Labels`
// - `events`: `GET /events` filtered to container events, a long-lived
//   response streaming one JSON object per line
//
// `events` returns once the daemon has answered the subscription, so
// anything listed afterwards cannot miss an event. The body is then read
// by a spawned task that decodes lines and feeds a bounded channel. The
// task stops when the receiver is dropped. When the daemon closes the
// stream or the connection fails, the task yields one terminal `Err` and
// exits; there is no reconnect.

mod api;
mod transport;

pub use transport::Endpoint;

use api::{ContainerInspect, ContainerSummary, EventMessage, LineBuffer};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::StatusCode;
use hyper::body::Incoming;
use namepal_core::config::{DEFAULT_TIMEOUT_SECS, SourceConfig};
use namepal_core::traits::{WorkloadEventStream, WorkloadSource, WorkloadSourceFactory};
use namepal_core::{ComponentRegistry, Error, Result, WorkloadEvent};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const SOURCE_NAME: &str = "docker";

/// Events buffered between the reader task and the watcher
const EVENT_BUFFER: usize = 64;

/// `{"type":["container"]}`, percent-encoded
const EVENTS_PATH: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

/// Docker Engine workload source
#[derive(Debug, Clone)]
pub struct DockerSource {
    endpoint: Endpoint,

    /// Bound on listing, inspection and the subscription handshake
    request_timeout: Duration,
}

impl DockerSource {
    /// Create a source talking to `host` (`unix://…`, `tcp://…` or `http://…`)
    pub fn new(host: &str) -> Result<Self> {
        Self::with_timeout(host, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a source whose requests give up after `request_timeout`
    pub fn with_timeout(host: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::parse(host)?,
            request_timeout,
        })
    }

    async fn bounded<T>(&self, what: &str, request: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| {
                Error::watch_source(format!(
                    "Docker {} timed out after {:?}",
                    what, self.request_timeout
                ))
            })?
    }

    async fn get_bytes(&self, path: &str) -> Result<(StatusCode, Bytes)> {
        self.bounded(path, self.endpoint.get_bytes(path)).await
    }
}

#[async_trait::async_trait]
impl WorkloadSource for DockerSource {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn list_workloads(&self) -> Result<Vec<String>> {
        let (status, body) = self.get_bytes("/containers/json").await?;
        if !status.is_success() {
            return Err(Error::watch_source(format!(
                "Docker container listing failed: {} - {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let containers: Vec<ContainerSummary> = serde_json::from_slice(&body)?;
        Ok(containers.into_iter().map(|c| c.id).collect())
    }

    async fn inspect_labels(&self, id: &str) -> Result<HashMap<String, String>> {
        let (status, body) = self
            .get_bytes(&format!("/containers/{}/json", id))
            .await
            .map_err(|e| Error::workload(id, e.to_string()))?;

        if !status.is_success() {
            return Err(Error::workload(
                id,
                format!("inspect failed: {} - {}", status, String::from_utf8_lossy(&body).trim()),
            ));
        }

        let inspect: ContainerInspect = serde_json::from_slice(&body)
            .map_err(|e| Error::workload(id, format!("unreadable inspect response: {}", e)))?;
        Ok(inspect.into_labels())
    }

    async fn events(&self) -> Result<WorkloadEventStream> {
        let response = self
            .bounded("event subscription", self.endpoint.get(EVENTS_PATH))
            .await?;
        if !response.status().is_success() {
            return Err(Error::watch_source(format!(
                "Docker event subscription refused: {}",
                response.status()
            )));
        }
        tracing::info!(endpoint = ?self.endpoint, "Subscribed to Docker events");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let body = response.into_body();

        tokio::spawn(async move {
            let error = match read_events(body, &tx).await {
                Ok(ReadEnd::ReceiverDropped) => return,
                Ok(ReadEnd::StreamClosed) => {
                    Error::watch_source("Docker event stream closed by the daemon")
                }
                Err(e) => e,
            };
            // Terminal item; the receiver may already be gone
            let _ = tx.send(Err(error)).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

enum ReadEnd {
    StreamClosed,
    ReceiverDropped,
}

async fn read_events(mut body: Incoming, tx: &mpsc::Sender<Result<WorkloadEvent>>) -> Result<ReadEnd> {
    let mut lines = LineBuffer::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::watch_source(format!("Docker event stream: {}", e)))?;
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        lines.push(&chunk)?;

        while let Some(line) = lines.next_line() {
            let message: EventMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed Docker event");
                    continue;
                }
            };
            let Some(event) = message.into_workload_event() else {
                continue;
            };
            tracing::trace!(action = %event.action, "Docker event");
            if tx.send(Ok(event)).await.is_err() {
                return Ok(ReadEnd::ReceiverDropped);
            }
        }
    }

    Ok(ReadEnd::StreamClosed)
}

/// Factory for creating Docker sources
pub struct DockerFactory;

impl WorkloadSourceFactory for DockerFactory {
    fn create(&self, config: &SourceConfig) -> Result<Box<dyn WorkloadSource>> {
        match config {
            SourceConfig::Docker { host, timeout_secs } => Ok(Box::new(DockerSource::with_timeout(
                host,
                Duration::from_secs(*timeout_secs),
            )?)),
            _ => Err(Error::config("Invalid config for Docker source")),
        }
    }
}

/// Register the Docker source with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_source(SOURCE_NAME, Box::new(DockerFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use namepal_core::traits::WorkloadEventKind;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_stream::StreamExt;

    /// A fake daemon answering one request per connection with canned
    /// responses. Bodies carry no length and end when the socket closes.
    async fn fake_daemon(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let target = request.split_whitespace().nth(1).unwrap_or("").to_string();
                recorded.lock().unwrap().push(target);

                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                    status
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(body.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        (format!("tcp://{}", addr), seen)
    }

    #[tokio::test]
    async fn lists_running_containers() {
        let (host, seen) = fake_daemon(vec![(200, r#"[{"Id":"aaa"},{"Id":"bbb"}]"#)]).await;
        let source = DockerSource::new(&host).unwrap();

        assert_eq!(source.list_workloads().await.unwrap(), vec!["aaa", "bbb"]);
        assert_eq!(seen.lock().unwrap().as_slice(), ["/v1.41/containers/json"]);
    }

    #[tokio::test]
    async fn inspects_labels() {
        let (host, seen) = fake_daemon(vec![
            (200, r#"{"Id":"aaa","Config":{"Labels":{"traefik.http.routers.web.rule":"Host(`web.lan`)"}}}"#),
            (404, r#"{"message":"No such container: gone"}"#),
        ])
        .await;
        let source = DockerSource::new(&host).unwrap();

        let labels = source.inspect_labels("aaa").await.unwrap();
        assert_eq!(
            labels.get("traefik.http.routers.web.rule").map(String::as_str),
            Some("Host(`web.lan`)")
        );

        let err = source.inspect_labels("gone").await.unwrap_err();
        assert!(matches!(err, Error::Workload { ref id, .. } if id == "gone"));
        assert_eq!(seen.lock().unwrap()[1], "/v1.41/containers/gone/json");
    }

    #[tokio::test]
    async fn streams_events_until_close() {
        let (host, seen) = fake_daemon(vec![(
            200,
            concat!(
                r#"{"Type":"container","Action":"start","Actor":{"ID":"aaa"}}"#,
                "\n",
                "not json\n",
                r#"{"Type":"container","Action":"die","Actor":{"ID":"aaa"}}"#,
                "\n",
            ),
        )])
        .await;
        let source = DockerSource::new(&host).unwrap();
        let mut events = source.events().await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.kind, WorkloadEventKind::Started);
        assert_eq!(first.workload_id, "aaa");

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.kind, WorkloadEventKind::Stopped);

        assert!(matches!(events.next().await, Some(Err(Error::WatchSource(_)))));
        assert!(events.next().await.is_none());
        assert!(seen.lock().unwrap()[0].starts_with("/v1.41/events?filters="));
    }

    #[tokio::test]
    async fn unreachable_daemon_yields_terminal_error() {
        let source = DockerSource::new("tcp://127.0.0.1:1").unwrap();
        assert!(matches!(source.events().await, Err(Error::WatchSource(_))));
        assert!(source.list_workloads().await.is_err());
    }

    #[tokio::test]
    async fn subscription_is_established_before_events_returns() {
        let (host, seen) = fake_daemon(vec![(200, "")]).await;
        let source = DockerSource::new(&host).unwrap();

        let _events = source.events().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("/v1.41/events?filters="));
    }

    #[tokio::test]
    async fn refused_subscription_is_an_error() {
        let (host, _seen) = fake_daemon(vec![(500, r#"{"message":"boom"}"#)]).await;
        let source = DockerSource::new(&host).unwrap();
        assert!(matches!(source.events().await, Err(Error::WatchSource(_))));
    }

    #[tokio::test]
    async fn hung_daemon_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let source =
            DockerSource::with_timeout(&format!("tcp://{}", addr), Duration::from_millis(100)).unwrap();

        let listed = tokio::time::timeout(Duration::from_secs(2), source.list_workloads())
            .await
            .expect("listing gives up on its own");
        assert!(matches!(listed, Err(Error::WatchSource(_))));

        let inspected = tokio::time::timeout(Duration::from_secs(2), source.inspect_labels("aaa"))
            .await
            .expect("inspection gives up on its own");
        assert!(matches!(inspected, Err(Error::Workload { .. })));
    }

    #[test]
    fn factory_and_registration() {
        let registry = ComponentRegistry::new();
        register(&registry);
        assert!(registry.create_source(&SourceConfig::default()).is_ok());
        assert!(
            DockerFactory
                .create(&SourceConfig::Docker {
                    host: "ssh://nope".to_string(),
                    timeout_secs: 10,
                })
                .is_err()
        );
    }
}
