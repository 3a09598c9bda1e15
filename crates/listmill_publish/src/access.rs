//! Access gate for public artifacts: token resolution and IP admission.
//!
//! Rules are evaluated in order; each rule is an exact address, a CIDR
//! network, or an inclusive `start-end` range. Localhost is always admitted.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use constant_time_eq::constant_time_eq;
use ipnet::IpNet;
use thiserror::Error;
use tracing::warn;

use crate::artifacts::ArtifactFormat;
use listmill_store::{List, ListStore, StoreError};

/// Client IP headers consulted before the peer address, in priority order.
const CLIENT_IP_HEADERS: [&str; 4] = [
    "true-client-ip",
    "x-client-ip",
    "x-real-ip",
    "x-forwarded-for",
];

#[derive(Debug, Error)]
pub enum AccessError {
    /// Unknown token or the requested format is not enabled: indistinguishable
    /// from a missing resource on purpose.
    #[error("unknown or disabled public artifact")]
    NotFound,

    #[error("client {client_ip} is not allowed by the list's IP rules")]
    Denied {
        client_ip: String,
        rules: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AccessGate {
    store: Arc<ListStore>,
}

impl AccessGate {
    pub fn new(store: Arc<ListStore>) -> Self {
        Self { store }
    }

    /// Authorize a public request: resolve the list by token, verify the
    /// requested format is enabled, and evaluate IP restrictions.
    pub async fn authorize(
        &self,
        token: &str,
        format: ArtifactFormat,
        client_ip: IpAddr,
    ) -> Result<List, AccessError> {
        let list = self
            .store
            .get_list_by_token(token)
            .await?
            .ok_or(AccessError::NotFound)?;

        // The store lookup already matched; re-check with a constant-time
        // comparison on the token bytes.
        let stored = list.public_access_token.as_deref().unwrap_or("");
        if !constant_time_eq(stored.as_bytes(), token.as_bytes()) {
            return Err(AccessError::NotFound);
        }

        if !format.enabled_for(&list) {
            return Err(AccessError::NotFound);
        }

        if list.ip_restriction_enabled && !ip_allowed(&list, client_ip) {
            let rules = list.allowed_ip_rules();
            warn!(
                "List {}: denied {} (rules: {:?})",
                list.id, client_ip, rules
            );
            return Err(AccessError::Denied {
                client_ip: client_ip.to_string(),
                rules,
            });
        }

        Ok(list)
    }
}

/// Derive the client address from forwarding headers, falling back to the
/// peer address. `header` looks up a request header by lowercase name.
pub fn derive_client_ip(header: impl Fn(&str) -> Option<String>, peer: IpAddr) -> IpAddr {
    for name in CLIENT_IP_HEADERS {
        let Some(raw) = header(name) else { continue };
        // X-Forwarded-For may carry a chain; the first entry is the client.
        let candidate = raw.split(',').next().unwrap_or("").trim();
        if let Ok(ip) = IpAddr::from_str(candidate) {
            return ip;
        }
    }
    peer
}

/// Evaluate the list's admission rules against a client address.
pub fn ip_allowed(list: &List, client_ip: IpAddr) -> bool {
    if client_ip.is_loopback() {
        return true;
    }
    let rules = list.allowed_ip_rules();
    if rules.is_empty() {
        return false;
    }
    rules.iter().any(|rule| rule_matches(rule, client_ip))
}

fn rule_matches(rule: &str, client_ip: IpAddr) -> bool {
    let rule = rule.trim();
    if rule.is_empty() {
        return false;
    }
    if let Some((start, end)) = rule.split_once('-') {
        let (Ok(start), Ok(end)) = (
            IpAddr::from_str(start.trim()),
            IpAddr::from_str(end.trim()),
        ) else {
            return false;
        };
        return start <= client_ip && client_ip <= end;
    }
    if rule.contains('/') {
        return IpNet::from_str(rule)
            .map(|net| net.contains(&client_ip))
            .unwrap_or(false);
    }
    IpAddr::from_str(rule)
        .map(|ip| ip == client_ip)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(raw: &str) -> IpAddr {
        IpAddr::from_str(raw).unwrap()
    }

    #[test]
    fn rules_match_exact_cidr_and_range() {
        assert!(rule_matches("10.0.0.1", ip("10.0.0.1")));
        assert!(!rule_matches("10.0.0.1", ip("10.0.0.2")));

        assert!(rule_matches("192.168.0.0/24", ip("192.168.0.200")));
        assert!(!rule_matches("192.168.0.0/24", ip("192.168.1.1")));

        assert!(rule_matches("172.16.0.5-172.16.0.9", ip("172.16.0.7")));
        assert!(rule_matches("172.16.0.5-172.16.0.9", ip("172.16.0.5")));
        assert!(rule_matches("172.16.0.5-172.16.0.9", ip("172.16.0.9")));
        assert!(!rule_matches("172.16.0.5-172.16.0.9", ip("172.16.0.10")));

        // Malformed rules never match.
        assert!(!rule_matches("not-an-ip", ip("10.0.0.1")));
        assert!(!rule_matches("10.0.0.0/99", ip("10.0.0.1")));
    }

    #[test]
    fn client_ip_header_priority() {
        let peer = ip("203.0.113.9");

        let derived = derive_client_ip(
            |name| match name {
                "x-real-ip" => Some("10.1.1.1".into()),
                "true-client-ip" => Some("10.2.2.2".into()),
                _ => None,
            },
            peer,
        );
        assert_eq!(derived, ip("10.2.2.2"));

        let derived = derive_client_ip(
            |name| match name {
                "x-forwarded-for" => Some("10.3.3.3, 10.9.9.9".into()),
                _ => None,
            },
            peer,
        );
        assert_eq!(derived, ip("10.3.3.3"));

        let derived = derive_client_ip(|_| None, peer);
        assert_eq!(derived, peer);
    }
}
