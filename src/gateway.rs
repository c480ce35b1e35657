//! Shared leader/availability state
//!
//! `GatewayState` is the single in-memory fact base the three controllers
//! converge on: which nodes currently qualify as egress gateways, and which
//! one of them holds the leadership lease. It is constructed once in `main`
//! and handed to each controller behind an `Arc`; there is no persistence and
//! the map is rebuilt from a full listing at startup.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Inner {
    /// Currently ready, eligible nodes: node IP -> hostname.
    nodes: HashMap<String, String>,
    leader_ip: String,
    leader_hostname: String,
}

/// Concurrency-safe store of gateway node availability and the current
/// leader identity. All operations are O(1) map mutations (plus one clone
/// for snapshots) under a single reader/writer lock; no I/O ever happens
/// while the lock is held.
#[derive(Debug, Default)]
pub struct GatewayState {
    inner: RwLock<Inner>,
}

impl GatewayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's availability. Unavailable removes the entry
    /// unconditionally; available upserts only when both fields are
    /// non-empty.
    pub fn record_node(&self, ip: &str, hostname: &str, available: bool) {
        let mut inner = self.write();
        if !available {
            inner.nodes.remove(ip);
            return;
        }
        if ip.is_empty() || hostname.is_empty() {
            return;
        }
        inner.nodes.insert(ip.to_string(), hostname.to_string());
    }

    /// True iff the stored mapping for `ip` is exactly `hostname`. The pair
    /// match protects against a reassigned IP pointing at a different host.
    pub fn node_available(&self, ip: &str, hostname: &str) -> bool {
        if ip.is_empty() || hostname.is_empty() {
            return false;
        }
        let inner = self.read();
        inner.nodes.get(ip).is_some_and(|h| h.as_str() == hostname)
    }

    /// Snapshot of the availability map. Always a copy, never the live map,
    /// so callers can iterate without holding the lock.
    pub fn available_nodes(&self) -> HashMap<String, String> {
        self.read().nodes.clone()
    }

    /// Replace the leader fact. A partially-specified identity is ignored:
    /// the leader is only ever overwritten by a complete one, never blanked.
    pub fn set_leader(&self, ip: &str, hostname: &str) {
        if ip.is_empty() || hostname.is_empty() {
            return;
        }
        let mut inner = self.write();
        inner.leader_ip = ip.to_string();
        inner.leader_hostname = hostname.to_string();
    }

    pub fn leader_ip(&self) -> String {
        self.read().leader_ip.clone()
    }

    pub fn leader_hostname(&self) -> String {
        self.read().leader_hostname.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
