//! Docker Engine API transport
//!
//! One HTTP/1.1 connection per request, over a Unix socket or TCP,
//! driven by hyper's low-level client.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use namepal_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// API version prefix for every request
pub const API_VERSION: &str = "/v1.41";

/// Where the Docker daemon listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Path of a Unix socket
    Unix(String),
    /// `host:port`
    Tcp(String),
}

impl Endpoint {
    /// Parse a `unix://`, `tcp://` or `http://` host
    pub fn parse(host: &str) -> Result<Self> {
        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::config("Docker unix host needs a socket path"));
            }
            return Ok(Endpoint::Unix(path.to_string()));
        }

        let authority = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
            .ok_or_else(|| Error::config(format!("Unsupported Docker host: {}", host)))?
            .trim_end_matches('/');

        if authority.is_empty() {
            return Err(Error::config("Docker tcp host needs an address"));
        }
        Ok(Endpoint::Tcp(authority.to_string()))
    }

    /// Value of the `Host` header
    fn host_header(&self) -> &str {
        match self {
            Endpoint::Unix(_) => "localhost",
            Endpoint::Tcp(authority) => authority,
        }
    }

    /// Send `GET <API_VERSION><path>` and return the response head and body
    pub async fn get(&self, path: &str) -> Result<Response<Incoming>> {
        let mut sender = self.connect().await?;

        let request = Request::get(format!("{}{}", API_VERSION, path))
            .header(hyper::header::HOST, self.host_header())
            .body(Empty::<Bytes>::new())
            .map_err(|e| Error::Other(format!("Docker request build: {}", e)))?;

        sender
            .send_request(request)
            .await
            .map_err(|e| Error::watch_source(format!("Docker send: {}", e)))
    }

    /// `GET` and collect the whole body
    pub async fn get_bytes(&self, path: &str) -> Result<(StatusCode, Bytes)> {
        let response = self.get(path).await?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::watch_source(format!("Docker collect body: {}", e)))?
            .to_bytes();
        Ok((status, body))
    }

    async fn connect(&self) -> Result<http1::SendRequest<Empty<Bytes>>> {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
                    Error::watch_source(format!("Docker: cannot connect to '{}': {}", path, e))
                })?;
                handshake(stream).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(Error::config(
                "Docker Unix socket connections are not supported on this platform",
            )),
            Endpoint::Tcp(authority) => {
                let stream = TcpStream::connect(authority.as_str()).await.map_err(|e| {
                    Error::watch_source(format!("Docker: cannot connect to '{}': {}", authority, e))
                })?;
                handshake(stream).await
            }
        }
    }
}

async fn handshake<S>(stream: S) -> Result<http1::SendRequest<Empty<Bytes>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::watch_source(format!("Docker handshake: {}", e)))?;

    // Drive the connection until the response body is consumed
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Docker connection closed");
        }
    });

    Ok(sender)
}
