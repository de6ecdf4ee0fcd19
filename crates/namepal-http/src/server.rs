//! Registration server
//!
//! Accepts `POST /api/register` and runs one reconciliation pass per
//! request.
//!
//! | Outcome                          | Status |
//! |----------------------------------|--------|
//! | pass completed                   | 200    |
//! | malformed body, empty domain     | 400    |
//! | unknown path                     | 404    |
//! | method other than POST           | 405    |
//! | backend call failed              | 502    |
//!
//! A 502 body names the failed operation:
//!
//! ```json
//! {"error": "...", "operation": {"backend": "pihole", "verb": "add", "domain": "a.lan", "ip": "10.0.0.2"}}
//! ```
//!
//! Each pass runs on its own task. A client that disconnects or times out
//! does not cancel it, and shutdown waits for every started pass.

use crate::{REGISTER_PATH, RegisterBody, extract_origin_ip};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use namepal_core::{Error, Reconciler, Result};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP server feeding registrations into a [`Reconciler`]
pub struct RegistrationServer {
    reconciler: Arc<Reconciler>,
}

impl RegistrationServer {
    /// Create a new server
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Bind `addr` and serve until `shutdown_rx` fires
    pub async fn run(self, addr: SocketAddr, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::config(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener, shutdown_rx).await
    }

    /// Serve on an already bound listener until `shutdown_rx` fires
    ///
    /// Shutdown stops accepting connections, closes idle ones, and returns
    /// once every request in flight and every pass it started has finished.
    pub async fn serve(self, listener: TcpListener, mut shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            backend = self.reconciler.backend_name(),
            "Registration server listening"
        );

        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        connections.spawn(serve_connection(
                            stream,
                            remote_addr,
                            self.reconciler.clone(),
                            drain_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(listener);
        let _ = drain_tx.send(());
        tracing::info!(
            connections = connections.len(),
            "Shutdown signal received, draining registration server"
        );
        while connections.join_next().await.is_some() {}
        tracing::info!("Registration server stopped");
        Ok(())
    }
}

/// Serve one connection, then wait for the passes it started
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    reconciler: Arc<Reconciler>,
    mut drain_rx: watch::Receiver<()>,
) {
    // Every pass holds a sender clone; recv() yields None once all are gone
    let (passes_tx, mut passes_rx) = mpsc::channel::<()>(1);
    let service = service_fn(move |req| {
        handle_request(req, remote_addr, reconciler.clone(), passes_tx.clone())
    });

    let mut conn = Box::pin(http1::Builder::new().serve_connection(TokioIo::new(stream), service));
    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = drain_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, remote = %remote_addr, "Connection error");
    }

    drop(conn);
    while passes_rx.recv().await.is_some() {}
}

async fn handle_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    reconciler: Arc<Reconciler>,
    pass_guard: mpsc::Sender<()>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() != REGISTER_PATH {
        return Ok(json_response(StatusCode::NOT_FOUND, &json!({"error": "not found"})));
    }

    if req.method() != Method::POST {
        tracing::debug!(method = %req.method(), "Ignoring non-POST registration");
        let mut response = json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &json!({"error": "method not allowed"}),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return Ok(response);
    }

    let (parts, body) = req.into_parts();
    let ip = extract_origin_ip(&parts.headers, remote_addr);

    let bytes = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(ip = %ip, error = %e, "Unreadable registration body");
            return Ok(bad_request(format!("unreadable body: {}", e)));
        }
    };

    let body: RegisterBody = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(ip = %ip, error = %e, "Malformed registration body");
            return Ok(bad_request(format!("malformed body: {}", e)));
        }
    };

    tracing::info!(ip = %ip, domains = ?body.data, "Registration received");

    let pass_ip = ip.clone();
    let pass = tokio::spawn(async move {
        let _in_flight = pass_guard;
        reconciler.reconcile(&pass_ip, &body.data).await
    });

    match pass.await {
        Ok(Ok(report)) => Ok(json_response(StatusCode::OK, &report)),
        Ok(Err(e)) => Ok(error_response(&ip, e)),
        Err(e) => {
            tracing::error!(ip = %ip, error = %e, "Reconciliation task failed");
            Ok(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"error": "reconciliation task failed"}),
            ))
        }
    }
}

fn error_response(ip: &str, error: Error) -> Response<Full<Bytes>> {
    if let Error::InvalidInput(message) = &error {
        tracing::warn!(ip, error = %message, "Rejected registration");
        return bad_request(message.clone());
    }

    tracing::error!(ip, error = %error, "Registration failed");

    match error.backend_error() {
        Some(failed) => json_response(
            StatusCode::BAD_GATEWAY,
            &json!({
                "error": error.to_string(),
                "operation": {
                    "backend": failed.backend,
                    "verb": failed.verb,
                    "domain": failed.domain,
                    "ip": failed.ip,
                },
            }),
        ),
        None => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({"error": error.to_string()}),
        ),
    }
}

fn bad_request(message: String) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, &json!({"error": message}))
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
