//! Gossip engine: builds and broadcasts periodic announcements, applies
//! inbound ones to the gradient and routing tables, and forwards them
//! along the mesh. Provides only eventual consistency — there is no
//! global ordering and no leader election.

mod envelope;

pub use envelope::{AnnouncementEnvelope, EndpointSnapshot, GossipCapability, ResourceSnapshot};

use crate::error::GossipReject;
use crate::gradient::GradientTable;
use crate::routing_table::{RouteEntry, RoutingTable, TransportKind};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters mirrored in a `debug`-level log line on every gossip cycle.
#[derive(Debug, Clone, Default)]
pub struct GossipStats {
    pub announcements_sent: u64,
    pub announcements_received: u64,
    pub envelopes_forwarded: u64,
    pub envelopes_rejected_replay: u64,
    pub envelopes_rejected_clock: u64,
    pub nonce_cache_size: usize,
}

/// What the caller should do with an inbound envelope once the gossip
/// engine has applied it to local tables.
pub enum GossipAction {
    Drop(GossipReject),
    Forward(AnnouncementEnvelope),
    Terminal,
}

struct NonceCache {
    seen: HashMap<String, i64>,
    ttl_secs: i64,
}

impl NonceCache {
    fn new(ttl_secs: i64) -> Self {
        Self {
            seen: HashMap::new(),
            ttl_secs,
        }
    }

    fn check_and_record(&mut self, nonce: &str, now: i64) -> bool {
        self.sweep(now);
        if self.seen.contains_key(nonce) {
            return false;
        }
        self.seen.insert(nonce.to_string(), now);
        true
    }

    fn sweep(&mut self, now: i64) {
        self.seen.retain(|_, seen_at| now - *seen_at <= self.ttl_secs);
    }
}

pub struct GossipEngine {
    node_id: String,
    max_capabilities: usize,
    announcement_ttl: u8,
    clock_skew_tolerance_secs: i64,
    nonce_cache: Mutex<NonceCache>,
    stats: Mutex<GossipStats>,
}

impl GossipEngine {
    pub fn new(
        node_id: impl Into<String>,
        max_capabilities: usize,
        announcement_ttl: u8,
        nonce_cache_ttl_secs: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            max_capabilities,
            announcement_ttl,
            clock_skew_tolerance_secs: nonce_cache_ttl_secs as i64,
            nonce_cache: Mutex::new(NonceCache::new(nonce_cache_ttl_secs as i64)),
            stats: Mutex::new(GossipStats::default()),
        }
    }

    /// Build a fresh announcement: up to `max_capabilities` local
    /// entries (hops=0), then gradient exports filling remaining slots,
    /// then the current endpoint/resource snapshot.
    pub fn build_announcement(
        &self,
        local_capabilities: Vec<GossipCapability>,
        gradient: &GradientTable,
        endpoints: Option<EndpointSnapshot>,
        resources: Option<ResourceSnapshot>,
    ) -> AnnouncementEnvelope {
        let mut capabilities = local_capabilities;
        if capabilities.len() < self.max_capabilities {
            let remaining = self.max_capabilities - capabilities.len();
            let exported = gradient.export_for_gossip(5);
            for entry in exported.into_iter().take(remaining) {
                capabilities.push(GossipCapability {
                    id: entry.capability_id,
                    label: entry.label,
                    description: String::new(),
                    vector: entry.embedding,
                    local: false,
                    hops: entry.hops,
                    via: Some(entry.via),
                    models: Vec::new(),
                    constraints: serde_json::Value::Object(Default::default()),
                    estimated_latency_ms: entry.estimated_latency_ms.unwrap_or(0.0),
                });
            }
        }
        capabilities.truncate(self.max_capabilities);

        let envelope = AnnouncementEnvelope {
            envelope_type: "announce".to_string(),
            from_node: self.node_id.clone(),
            capabilities,
            resources,
            endpoints,
            timestamp: now_secs_f64(),
            ttl: self.announcement_ttl,
            nonce: random_nonce(),
        };

        self.stats.lock().announcements_sent += 1;
        envelope
    }

    /// Apply an inbound envelope to the gradient and routing tables,
    /// returning what the caller should do with it next.
    pub fn handle_inbound(
        &self,
        envelope: AnnouncementEnvelope,
        gradient: &GradientTable,
        routing_table: &RoutingTable,
    ) -> GossipAction {
        let now = now_unix();
        let now_f64 = now_secs_f64();

        if (now_f64 - envelope.timestamp).abs() > self.clock_skew_tolerance_secs as f64 {
            self.stats.lock().envelopes_rejected_clock += 1;
            return GossipAction::Drop(GossipReject::ClockSkew {
                delta_secs: (now_f64 - envelope.timestamp) as i64,
            });
        }

        if !self.nonce_cache.lock().check_and_record(&envelope.nonce, now) {
            self.stats.lock().envelopes_rejected_replay += 1;
            return GossipAction::Drop(GossipReject::ReplayedNonce(envelope.nonce.clone()));
        }

        self.stats.lock().announcements_received += 1;
        self.learn_routes(&envelope, routing_table);
        self.learn_gradient(&envelope, gradient);

        if envelope.ttl > 1 {
            let mut forwarded = envelope;
            forwarded.ttl -= 1;
            for capability in forwarded.capabilities.iter_mut() {
                if !capability.local {
                    capability.hops += 1;
                }
            }
            self.stats.lock().envelopes_forwarded += 1;
            GossipAction::Forward(forwarded)
        } else {
            GossipAction::Terminal
        }
    }

    fn learn_routes(&self, envelope: &AnnouncementEnvelope, routing_table: &RoutingTable) {
        let transport = match &envelope.endpoints {
            Some(endpoints) if !endpoints.local_ips.is_empty() => TransportKind::Lan,
            _ => TransportKind::Relay,
        };

        routing_table.upsert(RouteEntry {
            destination: envelope.from_node.clone(),
            transport,
            next_hop: envelope.from_node.clone(),
            hops: 1,
            latency_ms: 50.0,
            reliability: 0.9,
            bandwidth_estimate: 1.0,
            last_updated: now_unix(),
            capability_labels: envelope
                .capabilities
                .iter()
                .map(|capability| capability.label.clone())
                .collect(),
        });

        for capability in &envelope.capabilities {
            if let Some(via) = &capability.via {
                routing_table.upsert(RouteEntry {
                    destination: via.clone(),
                    transport,
                    next_hop: envelope.from_node.clone(),
                    hops: capability.hops + 1,
                    latency_ms: 50.0 * (capability.hops + 1) as f32,
                    reliability: 0.85,
                    bandwidth_estimate: 1.0,
                    last_updated: now_unix(),
                    capability_labels: vec![capability.label.clone()],
                });
            }
        }
    }

    fn learn_gradient(&self, envelope: &AnnouncementEnvelope, gradient: &GradientTable) {
        for capability in &envelope.capabilities {
            let (hops, via) = if capability.local {
                (1, envelope.from_node.clone())
            } else {
                (
                    capability.hops + 1,
                    capability.via.clone().unwrap_or_else(|| envelope.from_node.clone()),
                )
            };

            gradient.update(
                &capability.id,
                &capability.label,
                capability.vector.clone(),
                hops,
                &envelope.from_node,
                &via,
                Some(capability.estimated_latency_ms),
            );
        }
    }

    pub fn stats(&self) -> GossipStats {
        let mut stats = self.stats.lock().clone();
        stats.nonce_cache_size = self.nonce_cache.lock().seen.len();
        stats
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
