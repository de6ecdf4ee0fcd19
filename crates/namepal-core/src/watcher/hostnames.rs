//! Hostname extraction from routing labels
//!
//! A label contributes hostnames when both hold:
//!
//! ```text
//! traefik.http.routers.<name>.rule = Host(`grafana.home.lan`) && PathPrefix(`/`)
//! └────── prefix ─────┘└name┘└sfx┘   └───── host predicate ─────┘
//! ```
//!
//! `<name>` is one or more word characters. Every `Host(...)` predicate in
//! the value is scanned and each backtick-quoted argument is a hostname, so
//! `Host(`a`) || Host(`b`)` and `Host(`a`, `b`)` both yield two names.

use crate::config::WatcherConfig;
use std::collections::HashMap;

const HOST_PREDICATE: &str = "Host(";

/// Matches router-rule labels and extracts the hostnames they route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameMatcher {
    prefix: String,
    suffix: String,
}

impl HostnameMatcher {
    /// Create a matcher for `<prefix><name><suffix>` label keys
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Create a matcher from watcher settings
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(&config.router_label_prefix, &config.router_label_suffix)
    }

    /// Whether `key` names a router rule
    pub fn is_router_rule(&self, key: &str) -> bool {
        key.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.suffix.as_str()))
            .is_some_and(|name| {
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
    }

    /// Hostnames routed by a workload's labels, in label-key order
    pub fn extract(&self, labels: &HashMap<String, String>) -> Vec<String> {
        let mut rules: Vec<(&String, &String)> = labels
            .iter()
            .filter(|(key, _)| self.is_router_rule(key))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(b.0));

        rules
            .into_iter()
            .flat_map(|(_, value)| host_predicates(value))
            .collect()
    }
}

impl Default for HostnameMatcher {
    fn default() -> Self {
        Self::from_config(&WatcherConfig::default())
    }
}

/// Every hostname quoted inside a `Host(...)` predicate of `rule`
///
/// Predicates with unterminated quotes or a missing `)` are ignored.
pub fn host_predicates(rule: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    let mut offset = 0;

    while let Some(found) = rule[offset..].find(HOST_PREDICATE) {
        let start = offset + found;
        offset = start + HOST_PREDICATE.len();

        // `XHost(` is a different matcher
        let preceded_by_word = rule[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if preceded_by_word {
            continue;
        }

        if let Some((args, consumed)) = parse_args(&rule[offset..]) {
            hosts.extend(args);
            offset += consumed;
        }
    }

    hosts
}

// Parses "`a`, `b`)" and returns the arguments plus the bytes consumed.
fn parse_args(input: &str) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        let quoted = rest.strip_prefix('`')?;
        let end = quoted.find('`')?;
        let arg = quoted[..end].trim();
        if !arg.is_empty() {
            args.push(arg.to_string());
        }
        rest = quoted[end + 1..].trim_start();

        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if let Some(after) = rest.strip_prefix(')') {
            return Some((args, input.len() - after.len()));
        } else {
            return None;
        }
    }
}
