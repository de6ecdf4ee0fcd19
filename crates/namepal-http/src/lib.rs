// # namepal-http
//
// Carries desired hostname sets from agents to the manager.
//
// ```text
// agent                                   manager
// ┌──────────────────┐  POST /api/register  ┌────────────────────┐
// │RegistrationClient│ ───────────────────► │ RegistrationServer │──► Reconciler
// └──────────────────┘  {"data": [...]}     └────────────────────┘
// ```
//
// The manager never trusts a claimed IP in the body: the origin IP is the
// caller's address, or a single `X-Forwarded-For` value when the agent
// sits behind a proxy.

pub mod client;
pub mod server;

pub use client::RegistrationClient;
pub use server::RegistrationServer;

use hyper::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Path of the registration endpoint
pub const REGISTER_PATH: &str = "/api/register";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Registration request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBody {
    /// Hostnames the calling host wants mapped to itself
    pub data: Vec<String>,
}

/// Origin IP of a registration
///
/// The `X-Forwarded-For` value is used when the header occurs exactly
/// once; otherwise the connection's remote IP (without port).
pub fn extract_origin_ip(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    let mut forwarded = headers.get_all(X_FORWARDED_FOR).iter();

    if let (Some(value), None) = (forwarded.next(), forwarded.next()) {
        if let Some(ip) = value.to_str().ok().map(str::trim).filter(|ip| !ip.is_empty()) {
            return ip.to_string();
        }
    }

    remote_addr.ip().to_string()
}
