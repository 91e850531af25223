//! Transport-level routing table: (destination, transport) → best known
//! route, learned from gossip envelopes. Independent of the gradient
//! table, which tracks capabilities rather than raw reachability.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Lan,
    Relay,
}

/// A known path to a destination over one transport kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: String,
    pub transport: TransportKind,
    pub next_hop: String,
    pub hops: u32,
    pub latency_ms: f32,
    pub reliability: f32,
    pub bandwidth_estimate: f32,
    pub last_updated: i64,
    pub capability_labels: Vec<String>,
}

impl RouteEntry {
    /// `(0.6·min(1, lat/1000) + 0.4·min(1, hops/10)) / max(0.1, reliability)`.
    pub fn cost(&self) -> f32 {
        let latency_term = (self.latency_ms / 1000.0).min(1.0);
        let hop_term = (self.hops as f32 / 10.0).min(1.0);
        (0.6 * latency_term + 0.4 * hop_term) / self.reliability.max(0.1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTableStats {
    pub per_transport_counts: HashMap<TransportKind, usize>,
    pub average_cost: f32,
}

pub struct RoutingTable {
    inner: RwLock<HashMap<(String, TransportKind), RouteEntry>>,
    staleness_secs: u64,
}

impl RoutingTable {
    pub fn new(staleness_secs: u64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            staleness_secs,
        }
    }

    /// Insert or refresh a route. Replaces the existing entry iff the new
    /// route costs less, or costs at most 10% more but is newer;
    /// otherwise only the timestamp of the existing entry is bumped.
    pub fn upsert(&self, mut entry: RouteEntry) {
        let key = (entry.destination.clone(), entry.transport);
        let mut table = self.inner.write();

        match table.get(&key) {
            None => {
                table.insert(key, entry);
            }
            Some(existing) => {
                let existing_cost = existing.cost();
                let new_cost = entry.cost();
                let replace = new_cost < existing_cost
                    || (new_cost <= existing_cost * 1.1 && entry.last_updated > existing.last_updated);
                if replace {
                    table.insert(key, entry);
                } else if let Some(existing_mut) = table.get_mut(&key) {
                    existing_mut.last_updated = entry.last_updated.max(existing_mut.last_updated);
                    entry.hops = existing_mut.hops;
                }
            }
        }
    }

    /// Lowest-cost non-stale route to `destination` across all transports.
    pub fn get_best_route(&self, destination: &str) -> Option<RouteEntry> {
        let now = now_unix();
        let table = self.inner.read();
        table
            .values()
            .filter(|entry| {
                entry.destination == destination
                    && now - entry.last_updated <= self.staleness_secs as i64
            })
            .min_by(|a, b| a.cost().partial_cmp(&b.cost()).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }

    pub fn remove_peer(&self, peer_id: &str) -> usize {
        let mut table = self.inner.write();
        let before = table.len();
        table.retain(|(destination, _), entry| destination != peer_id && entry.next_hop != peer_id);
        before - table.len()
    }

    pub fn cleanup_stale(&self) -> usize {
        let now = now_unix();
        let mut table = self.inner.write();
        let before = table.len();
        table.retain(|_, entry| now - entry.last_updated <= self.staleness_secs as i64);
        before - table.len()
    }

    pub fn export(&self) -> Vec<RouteEntry> {
        self.inner.read().values().cloned().collect()
    }

    pub fn import_routes(&self, snapshot: Vec<RouteEntry>) {
        for entry in snapshot {
            self.upsert(entry);
        }
    }

    pub fn stats(&self) -> RoutingTableStats {
        let table = self.inner.read();
        let mut per_transport_counts = HashMap::new();
        let mut total_cost = 0.0;
        for entry in table.values() {
            *per_transport_counts.entry(entry.transport).or_insert(0) += 1;
            total_cost += entry.cost();
        }
        let average_cost = if table.is_empty() {
            0.0
        } else {
            total_cost / table.len() as f32
        };
        RoutingTableStats {
            per_transport_counts,
            average_cost,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(destination: &str, latency_ms: f32, hops: u32, reliability: f32) -> RouteEntry {
        RouteEntry {
            destination: destination.to_string(),
            transport: TransportKind::Lan,
            next_hop: "peerA".to_string(),
            hops,
            latency_ms,
            reliability,
            bandwidth_estimate: 1.0,
            last_updated: now_unix(),
            capability_labels: vec![],
        }
    }

    #[test]
    fn lower_latency_route_has_lower_cost() {
        let fast = entry("nodeA", 10.0, 2, 0.9);
        let slow = entry("nodeA", 900.0, 2, 0.9);
        assert!(fast.cost() < slow.cost());
    }

    #[test]
    fn higher_reliability_route_has_lower_cost() {
        let reliable = entry("nodeA", 100.0, 2, 0.95);
        let unreliable = entry("nodeA", 100.0, 2, 0.2);
        assert!(reliable.cost() < unreliable.cost());
    }

    #[test]
    fn upsert_keeps_lowest_cost_route() {
        let table = RoutingTable::new(300);
        table.upsert(entry("nodeA", 900.0, 5, 0.5));
        table.upsert(entry("nodeA", 10.0, 1, 0.95));
        let best = table.get_best_route("nodeA").unwrap();
        assert_eq!(best.hops, 1);
    }

    #[test]
    fn remove_peer_drops_routes_through_it() {
        let table = RoutingTable::new(300);
        table.upsert(entry("nodeA", 10.0, 1, 0.9));
        let removed = table.remove_peer("peerA");
        assert_eq!(removed, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn export_import_round_trips() {
        let table = RoutingTable::new(300);
        table.upsert(entry("nodeA", 10.0, 1, 0.9));
        let snapshot = table.export();

        let restored = RoutingTable::new(300);
        restored.import_routes(snapshot);
        assert_eq!(restored.len(), 1);
    }
}
