//! Wire types for the gossip announcement envelope (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(rename = "from")]
    pub from_node: String,
    pub capabilities: Vec<GossipCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointSnapshot>,
    pub timestamp: f64,
    pub ttl: u8,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipCapability {
    pub id: String,
    pub label: String,
    pub description: String,
    pub vector: Vec<f32>,
    pub local: bool,
    pub hops: u32,
    pub via: Option<String>,
    pub models: Vec<String>,
    pub constraints: serde_json::Value,
    pub estimated_latency_ms: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_available: f32,
    pub memory_available_mb: f32,
    pub gpu_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub node_id: String,
    pub local_ips: Vec<String>,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    pub last_updated: i64,
}
