//! Transport manager (C6): *Connect ALL, use BEST, failover INSTANT.*
//! Maintains every available transport to every known peer, asks the
//! routing table which is currently cheapest, and retries on the
//! next-best connected transport the moment a send fails.

pub mod lan;
pub mod relay;

pub use lan::LanTransport;
pub use relay::RelayTransport;

use crate::error::TransportError;
use crate::routing_table::{RoutingTable, TransportKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-peer network reachability hints carried in announcements and fed
/// by transport discovery.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EndpointInfo {
    pub node_id: String,
    pub local_ips: Vec<String>,
    pub local_port: u16,
    pub relay_url: Option<String>,
    pub last_refreshed: i64,
}

/// Events a transport implementation reports back to the manager.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerDiscovered { peer_id: String, hints: Vec<String> },
    PeerConnected { peer_id: String },
    PeerDisconnected { peer_id: String },
    Message { peer_id: String, bytes: Vec<u8> },
}

/// The capability set the manager consumes. Concrete transports (LAN,
/// relay, future BLE/Matter) are implementations of this, not subclasses
/// of a shared base.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn estimated_cost_hint(&self) -> f32;
    fn is_available(&self) -> bool;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;

    async fn connect(&self, peer_id: &str, endpoint_hints: &[String]) -> anyhow::Result<()>;
    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()>;

    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn broadcast(&self, bytes: Vec<u8>);
}

/// A one-byte/JSON-tag dispatch target for inbound transport bytes.
#[derive(Debug, Clone)]
pub enum InboundKind {
    Gossip(Vec<u8>),
    ChatRequest(serde_json::Value),
    RouteRequest(serde_json::Value),
    Unknown(String),
}

/// Classify an inbound frame per §4.6's demultiplexing rule.
pub fn classify_inbound(bytes: &[u8]) -> InboundKind {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return InboundKind::Unknown("non-json".to_string());
    };
    match value.get("type").and_then(|t| t.as_str()) {
        Some("gossip") => {
            let payload = value
                .get("payload")
                .and_then(|p| p.as_str())
                .and_then(|b64| {
                    use base64::Engine;
                    base64::engine::general_purpose::STANDARD.decode(b64).ok()
                })
                .unwrap_or_default();
            InboundKind::Gossip(payload)
        }
        Some("chat_request") | Some("llm_request") => InboundKind::ChatRequest(value),
        Some("route_request") => InboundKind::RouteRequest(value),
        Some(other) => InboundKind::Unknown(other.to_string()),
        None => InboundKind::Unknown("missing type".to_string()),
    }
}

/// A named handle for a long-lived background task: an explicit
/// cancellation token plus its join handle, per the node's task-lifecycle
/// pattern of start/stop pairs rather than detached fire-and-forget spawns.
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run(cancel.clone()));
        Self { name, cancel, join }
    }

    pub async fn stop(self, grace: std::time::Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.join).await.is_err() {
            warn!(task = self.name, "task did not stop within grace period");
        }
    }
}

/// Multi-transport peer connection set with cost-based best-transport
/// selection, backed by the shared routing table.
pub struct TransportManager {
    transports: Vec<Arc<dyn Transport>>,
    routing_table: Arc<RoutingTable>,
    endpoints: RwLock<HashMap<String, EndpointInfo>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TransportManager {
    pub fn new(routing_table: Arc<RoutingTable>) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Self {
                transports: Vec::new(),
                routing_table,
                endpoints: RwLock::new(HashMap::new()),
                events_tx,
            },
            events_rx,
        )
    }

    pub fn events_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.events_tx.clone()
    }

    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    pub async fn start_all(&self) -> anyhow::Result<()> {
        for transport in &self.transports {
            transport.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> anyhow::Result<()> {
        for transport in &self.transports {
            transport.stop().await?;
        }
        Ok(())
    }

    /// Connect every available transport to a newly learned peer.
    pub async fn connect_all(&self, peer_id: &str, endpoint_hints: &[String]) {
        for transport in &self.transports {
            if transport.is_available() {
                if let Err(err) = transport.connect(peer_id, endpoint_hints).await {
                    debug!(peer_id, transport = ?transport.kind(), error = %err, "connect attempt failed");
                }
            }
        }
    }

    pub fn merge_endpoint(&self, info: EndpointInfo) {
        self.endpoints.write().insert(info.node_id.clone(), info);
    }

    pub fn endpoint_for(&self, node_id: &str) -> Option<EndpointInfo> {
        self.endpoints.read().get(node_id).cloned()
    }

    fn transport_for_kind(&self, kind: TransportKind) -> Option<&Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.kind() == kind)
    }

    /// Send to `peer_id` via the routing table's lowest-cost route. On
    /// failure, retry on the next-best connected transport before
    /// surfacing an error — only a total failure reaches the caller.
    pub async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut tried = Vec::new();

        while let Some(route) = self.next_best_untried_route(peer_id, &tried) {
            tried.push(route.transport);
            let Some(transport) = self.transport_for_kind(route.transport) else {
                continue;
            };
            match transport.send(peer_id, bytes.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(peer_id, transport = ?route.transport, error = %err, "send failed, trying next transport");
                }
            }
        }

        Err(TransportError {
            peer_id: peer_id.to_string(),
            transport: "all".to_string(),
            reason: "no healthy transport delivered the message".to_string(),
        })
    }

    fn next_best_untried_route(&self, peer_id: &str, tried: &[TransportKind]) -> Option<crate::routing_table::RouteEntry> {
        self.routing_table
            .export()
            .into_iter()
            .filter(|route| route.destination == peer_id && !tried.contains(&route.transport))
            .min_by(|a, b| a.cost().partial_cmp(&b.cost()).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub async fn broadcast(&self, bytes: Vec<u8>) {
        for transport in &self.transports {
            if transport.is_available() {
                transport.broadcast(bytes.clone()).await;
            }
        }
    }
}
