//! The node facade: wires identity, embedding, gradient/routing tables,
//! gossip, the capability router, and the transport manager into one
//! running process with explicit start/stop lifecycle.

use crate::config::NodeConfig;
use crate::embedding::{EmbeddingEngine, HashEmbeddingBackend};
use crate::gossip::{AnnouncementEnvelope, EndpointSnapshot, GossipAction, GossipCapability, GossipEngine, ResourceSnapshot};
use crate::gradient::GradientTable;
use crate::router::{CapabilityRouter, DispatchedIntent, RouteAction, TriggerRouter};
use crate::routing_table::RoutingTable;
use crate::transport::{classify_inbound, EndpointInfo, InboundKind, LanTransport, RelayTransport, TaskHandle, Transport, TransportEvent, TransportManager};
use anyhow::Context;
use atmosphere_crypto::{ed25519_sign, PublicKey};
use atmosphere_identity::{MeshIdentity, MeshInvite, MeshToken, NodeIdentity, TokenStore};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TTL for the self-signed invite token a founder hands out when
/// inviting a new member, capped like any other membership token.
const MESH_INVITE_TOKEN_TTL_SECS: i64 = 7 * 86400;

/// Everything needed to run one Atmosphere node: identity, the local
/// tables, and the transports that keep them fresh.
pub struct Node {
    node_id: String,
    identity: NodeIdentity,
    config: NodeConfig,
    state_dir: PathBuf,

    embedding: Arc<EmbeddingEngine>,
    gradient: Arc<GradientTable>,
    routing_table: Arc<RoutingTable>,
    router: Arc<CapabilityRouter>,
    triggers: Arc<TriggerRouter>,
    gossip: Arc<GossipEngine>,
    transport: Arc<TransportManager>,

    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    tasks: Mutex<Vec<TaskHandle>>,
    running: AtomicBool,

    mesh: RwLock<Option<MeshIdentity>>,
    mesh_id: RwLock<Option<String>>,
    token_store: Mutex<TokenStore>,
    bound_token: RwLock<Option<MeshToken>>,
}

impl Node {
    /// Load an existing identity/config from `state_dir`, or create a
    /// fresh identity and default config if this is the first run. The
    /// returned node has LAN and (if configured) relay transports
    /// registered and ready for `start()`.
    pub fn bootstrap(state_dir: impl Into<PathBuf>) -> anyhow::Result<Arc<Self>> {
        let state_dir = state_dir.into();
        let identity_path = state_dir.join("identity.json");
        let config_path = state_dir.join("config.json");

        let identity = if identity_path.exists() {
            NodeIdentity::load(&identity_path)?
        } else {
            let identity = NodeIdentity::generate(default_node_name());
            identity.save(&identity_path)?;
            identity
        };

        let config = if config_path.exists() {
            NodeConfig::load(&config_path)?
        } else {
            let config = NodeConfig::default();
            config.save(&config_path)?;
            config
        };

        let mesh_path = state_dir.join("mesh.json");
        let mesh = mesh_path.exists().then(|| MeshIdentity::load(&mesh_path).ok()).flatten();

        Ok(NodeBuilder::new(identity, config, state_dir)
            .with_mesh(mesh)
            .build())
    }

    pub fn new(identity: NodeIdentity, config: NodeConfig, state_dir: PathBuf) -> Self {
        let node_id = identity.node_id();

        let embedding = Arc::new(EmbeddingEngine::new(
            Arc::new(HashEmbeddingBackend),
            config.embedding_dimension,
            config.embedding_cache_capacity,
        ));
        let gradient = Arc::new(GradientTable::new(config.gradient_table_capacity, config.gradient_entry_ttl_secs));
        let routing_table = Arc::new(RoutingTable::new(config.routing_table_staleness_secs));
        let router = Arc::new(CapabilityRouter::new(
            node_id.clone(),
            embedding.clone(),
            config.match_threshold,
            config.min_route_threshold,
        ));
        let triggers = Arc::new(TriggerRouter::default());
        let gossip = Arc::new(GossipEngine::new(
            node_id.clone(),
            config.max_capabilities_per_envelope,
            config.announcement_ttl,
            config.nonce_cache_ttl_secs,
        ));

        let (transport_manager, events_rx) = TransportManager::new(routing_table.clone());

        Self {
            node_id,
            identity,
            config,
            state_dir,
            embedding,
            gradient,
            routing_table,
            router,
            triggers,
            gossip,
            transport: Arc::new(transport_manager),
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),

            mesh: RwLock::new(None),
            mesh_id: RwLock::new(None),
            token_store: Mutex::new(TokenStore::new()),
            bound_token: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn router(&self) -> &Arc<CapabilityRouter> {
        &self.router
    }

    pub fn triggers(&self) -> &Arc<TriggerRouter> {
        &self.triggers
    }

    pub fn gradient(&self) -> &Arc<GradientTable> {
        &self.gradient
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// The mesh this node has founded or joined, if any.
    pub fn mesh_id(&self) -> Option<String> {
        self.mesh_id.read().clone()
    }

    /// Register a local capability and emit its gradient self-entry, so
    /// the capability is actually reachable through `router()`/gossip.
    pub fn register_capability(
        &self,
        label: &str,
        description: &str,
        handler: &str,
        models: Vec<String>,
        constraints: Option<serde_json::Value>,
    ) -> anyhow::Result<String> {
        self.router
            .register_capability(label, description, handler, models, constraints, &self.gradient)
    }

    /// Fire a registered trigger: resolves handlers (exact hint → glob →
    /// semantic router → pattern/global handlers) and enqueues the
    /// result for async processing.
    pub fn fire_trigger(&self, capability_id: &str, event: &str, payload: serde_json::Value) -> Option<DispatchedIntent> {
        self.triggers.fire(capability_id, event, payload, &self.router, &self.gradient)
    }

    /// Found a new mesh: generate and persist its identity, register
    /// this node as the issuer of its own tokens, and return an invite
    /// other nodes can join with.
    pub fn create_mesh(&self, name: &str, threshold: usize, total_shares: usize) -> anyhow::Result<MeshInvite> {
        let mesh = MeshIdentity::create(name, threshold, total_shares, None)?;
        mesh.save(&self.state_dir.join("mesh.json"))?;

        let (_, private_key) = mesh
            .local_keypair()
            .ok_or_else(|| anyhow::anyhow!("mesh holds no local signing keypair"))?;
        let founder_proof = ed25519_sign(mesh.mesh_id.as_bytes(), &private_key.0)?;
        let public_key = PublicKey::from_bytes(&mesh.master_public_key_bytes()?)?;
        self.token_store.lock().register_mesh(&mesh.mesh_id, &public_key, &founder_proof)?;

        let token = MeshToken::create(
            mesh.mesh_id.clone(),
            None,
            vec!["route".to_string()],
            mesh.mesh_id.clone(),
            private_key,
            MESH_INVITE_TOKEN_TTL_SECS,
        )?;

        let invite = MeshInvite {
            token,
            mesh_name: mesh.name.clone(),
            endpoints: vec![format!("{}:{}", self.config.listen_host, self.config.listen_port)],
            mesh_public_key: mesh.master_public_key.clone(),
            founder_proof,
        };

        info!(mesh_id = %mesh.mesh_id, "mesh created");
        *self.mesh_id.write() = Some(mesh.mesh_id.clone());
        *self.mesh.write() = Some(mesh);
        Ok(invite)
    }

    /// Join a mesh from an invite: register the issuer key if this is
    /// the first time this node has seen the mesh, verify the invite
    /// token, and bind it as this node's membership proof.
    pub fn join_mesh(&self, invite: &MeshInvite) -> anyhow::Result<MeshToken> {
        let public_key = PublicKey::from_bytes(&base64_decode(&invite.mesh_public_key)?)?;
        let mesh_id = invite.token.mesh_id.clone();

        let mut store = self.token_store.lock();
        if store.get_mesh_key(&mesh_id).is_none() {
            store
                .register_mesh(&mesh_id, &public_key, &invite.founder_proof)
                .context("registering mesh issuer key from invite")?;
        }
        let verification = store.verify_token(&invite.token, &self.node_id);
        verification.into_result(&mesh_id).context("verifying mesh invite token")?;
        drop(store);

        info!(mesh_id = %mesh_id, "joined mesh");
        *self.mesh_id.write() = Some(mesh_id);
        *self.bound_token.write() = Some(invite.token.clone());
        Ok(invite.token.clone())
    }

    /// Issue a membership token to another node. Requires this node to
    /// hold the mesh's local signing keypair (founders only).
    pub fn issue_member_token(&self, node_id: &str, capabilities: Vec<String>, ttl_secs: i64) -> anyhow::Result<MeshToken> {
        let mesh_guard = self.mesh.read();
        let mesh = mesh_guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("this node has not founded or joined a mesh that can issue tokens"))?;
        let (_, private_key) = mesh
            .local_keypair()
            .ok_or_else(|| anyhow::anyhow!("mesh holds no local signing keypair, cannot issue tokens"))?;
        MeshToken::create(mesh.mesh_id.clone(), Some(node_id.to_string()), capabilities, mesh.mesh_id.clone(), private_key, ttl_secs)
    }

    /// Start every transport, then the gossip loop and the inbound event
    /// loop. Idempotent — calling twice on an already-running node is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.start_all().await?;

        let Some(events_rx) = self.events_rx.lock().take() else {
            anyhow::bail!("node already consumed its event receiver");
        };

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_event_loop(events_rx));
        tasks.push(self.spawn_gossip_loop());
        tasks.push(self.spawn_maintenance_loop());

        info!(node_id = %self.node_id, "node started");
        Ok(())
    }

    /// Stop background tasks (with a bounded grace period) and every
    /// transport.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let tasks: Vec<TaskHandle> = std::mem::take(&mut self.tasks.lock());
        for task in tasks {
            task.stop(SHUTDOWN_GRACE).await;
        }
        self.transport.stop_all().await?;
        info!(node_id = %self.node_id, "node stopped");
        Ok(())
    }

    fn spawn_event_loop(self: &Arc<Self>, mut events_rx: mpsc::Receiver<TransportEvent>) -> TaskHandle {
        let node = self.clone();
        TaskHandle::spawn("transport-event-loop", move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events_rx.recv() => {
                        match event {
                            Some(event) => node.handle_transport_event(event).await,
                            None => return,
                        }
                    }
                }
            }
        })
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { peer_id, hints } => {
                debug!(peer_id, ?hints, "peer discovered");
                self.transport.connect_all(&peer_id, &hints).await;
            }
            TransportEvent::PeerConnected { peer_id } => {
                info!(peer_id, "peer connected");
            }
            TransportEvent::PeerDisconnected { peer_id } => {
                warn!(peer_id, "peer disconnected");
                self.gradient.invalidate_node(&peer_id);
                self.routing_table.remove_peer(&peer_id);
            }
            TransportEvent::Message { peer_id, bytes } => {
                self.handle_inbound_message(&peer_id, bytes).await;
            }
        }
    }

    async fn handle_inbound_message(&self, peer_id: &str, bytes: Vec<u8>) {
        match classify_inbound(&bytes) {
            InboundKind::Gossip(payload) => self.handle_gossip_payload(payload).await,
            InboundKind::ChatRequest(value) => self.handle_chat_request(peer_id, value).await,
            InboundKind::RouteRequest(value) => self.handle_route_request(peer_id, value).await,
            InboundKind::Unknown(reason) => {
                debug!(peer_id, reason, "dropped inbound frame of unknown shape");
            }
        }
    }

    async fn handle_gossip_payload(&self, payload: Vec<u8>) {
        let Ok(envelope) = serde_json::from_slice::<AnnouncementEnvelope>(&payload) else {
            debug!("dropped malformed gossip envelope");
            return;
        };

        if let Some(endpoint_snapshot) = envelope.endpoints.clone() {
            self.transport.merge_endpoint(EndpointInfo {
                node_id: endpoint_snapshot.node_id.clone(),
                local_ips: endpoint_snapshot.local_ips.clone(),
                local_port: endpoint_snapshot.local_port,
                relay_url: endpoint_snapshot.relay_url.clone(),
                last_refreshed: endpoint_snapshot.last_updated,
            });
            let hints: Vec<String> = endpoint_snapshot
                .local_ips
                .iter()
                .map(|ip| format!("{ip}:{}", endpoint_snapshot.local_port))
                .collect();
            self.transport.connect_all(&endpoint_snapshot.node_id, &hints).await;
        }

        match self.gossip.handle_inbound(envelope, &self.gradient, &self.routing_table) {
            GossipAction::Drop(reject) => warn!(%reject, "gossip envelope rejected"),
            GossipAction::Forward(forwarded) => {
                if let Ok(bytes) = encode_gossip_frame(&forwarded) {
                    self.transport.broadcast(bytes).await;
                }
            }
            GossipAction::Terminal => {}
        }
    }

    async fn handle_chat_request(&self, peer_id: &str, value: serde_json::Value) {
        let Some(text) = value.get("text").and_then(|v| v.as_str()) else {
            debug!(peer_id, "chat request missing text field");
            return;
        };
        match self.router.route(text, &self.gradient) {
            Ok(result) if result.action == RouteAction::Forward => {
                if let Some(next_hop) = &result.next_hop {
                    let _ = self.transport.send(next_hop, serde_json::to_vec(&value).unwrap_or_default()).await;
                }
            }
            Ok(result) => debug!(peer_id, action = ?result.action, "chat request resolved locally"),
            Err(err) => error!(peer_id, error = %err, "routing failed"),
        }
    }

    async fn handle_route_request(&self, peer_id: &str, value: serde_json::Value) {
        let Some(text) = value.get("intent").and_then(|v| v.as_str()) else {
            debug!(peer_id, "route request missing intent field");
            return;
        };
        if let Err(err) = self.router.route(text, &self.gradient) {
            debug!(peer_id, error = %err, "route request had no match");
        }
    }

    fn spawn_gossip_loop(self: &Arc<Self>) -> TaskHandle {
        let node = self.clone();
        let interval = Duration::from_secs(node.config.gossip_interval_secs);
        TaskHandle::spawn("gossip-loop", move |cancel| async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => node.run_gossip_cycle().await,
                }
            }
        })
    }

    async fn run_gossip_cycle(&self) {
        let local_capabilities: Vec<GossipCapability> = self
            .router
            .get_local_capability_vectors()
            .into_iter()
            .map(|(id, vector)| GossipCapability {
                id,
                label: String::new(),
                description: String::new(),
                vector,
                local: true,
                hops: 0,
                via: None,
                models: Vec::new(),
                constraints: serde_json::Value::Object(Default::default()),
                estimated_latency_ms: 0.0,
            })
            .collect();

        let endpoints = self.transport.endpoint_for(&self.node_id).or_else(|| {
            Some(EndpointInfo {
                node_id: self.node_id.clone(),
                local_ips: Vec::new(),
                local_port: self.config.listen_port,
                relay_url: self.config.relay_url.clone(),
                last_refreshed: 0,
            })
        });

        let envelope = self.gossip.build_announcement(
            local_capabilities,
            &self.gradient,
            endpoints.map(|info| EndpointSnapshot {
                node_id: info.node_id,
                local_ips: info.local_ips,
                local_port: info.local_port,
                relay_url: info.relay_url,
                last_updated: info.last_refreshed,
            }),
            resource_snapshot(),
        );

        let stats = self.gossip.stats();
        debug!(sent = stats.announcements_sent, received = stats.announcements_received, "gossip cycle");

        if let Ok(bytes) = encode_gossip_frame(&envelope) {
            self.transport.broadcast(bytes).await;
        }
    }

    fn spawn_maintenance_loop(self: &Arc<Self>) -> TaskHandle {
        let node = self.clone();
        TaskHandle::spawn("maintenance-loop", move |cancel| async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let expired = node.gradient.prune_expired();
                        let stale = node.routing_table.cleanup_stale();
                        node.triggers.sweep_throttles();
                        if expired > 0 || stale > 0 {
                            debug!(expired, stale, "maintenance swept expired entries");
                        }
                    }
                }
            }
        })
    }
}

/// Build a node with LAN and (optionally) relay transports registered,
/// the only supported way to reach a runnable `Node` from the outside —
/// `Node::new` alone leaves the transport set empty for tests that don't
/// need real sockets.
pub struct NodeBuilder {
    node: Node,
    mesh: Option<MeshIdentity>,
}

impl NodeBuilder {
    pub fn new(identity: NodeIdentity, config: NodeConfig, state_dir: PathBuf) -> Self {
        Self {
            node: Node::new(identity, config, state_dir),
            mesh: None,
        }
    }

    /// Carry a previously founded/joined mesh identity into the built
    /// node, so the LAN transport advertises the right `mesh_id` and
    /// this node can issue tokens immediately if it's the founder.
    pub fn with_mesh(mut self, mesh: Option<MeshIdentity>) -> Self {
        self.mesh = mesh;
        self
    }

    pub fn build(self) -> Arc<Node> {
        let node_id = self.node.node_id.clone();
        let mesh_id = self.mesh.as_ref().map(|mesh| mesh.mesh_id.clone()).unwrap_or_default();
        let events_tx = self.node.transport.events_sender();

        let mut node = self.node;
        let manager = Arc::get_mut(&mut node.transport).expect("transport manager uniquely owned before Arc sharing begins");

        manager.register_transport(Arc::new(LanTransport::new(
            node_id.clone(),
            mesh_id.clone(),
            &[],
            node.config.listen_port,
            events_tx.clone(),
        )));

        if let Some(relay_url) = node.config.relay_url.clone() {
            manager.register_transport(Arc::new(RelayTransport::new(node_id, mesh_id, relay_url, events_tx)));
        }

        if let Some(mesh) = self.mesh {
            if let Some((_, private_key)) = mesh.local_keypair() {
                if let Ok(founder_proof) = ed25519_sign(mesh.mesh_id.as_bytes(), &private_key.0) {
                    if let Ok(public_key) = PublicKey::from_bytes(&mesh.master_public_key_bytes().unwrap_or_default()) {
                        let _ = node.token_store.lock().register_mesh(&mesh.mesh_id, &public_key, &founder_proof);
                    }
                }
            }
            *node.mesh_id.write() = Some(mesh.mesh_id.clone());
            *node.mesh.write() = Some(mesh);
        }

        Arc::new(node)
    }
}

fn base64_decode(s: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.decode(s)?)
}

fn encode_gossip_frame(envelope: &AnnouncementEnvelope) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;
    let payload = serde_json::to_vec(envelope)?;
    let frame = serde_json::json!({
        "type": "gossip",
        "from": envelope.from_node,
        "payload": base64::engine::general_purpose::STANDARD.encode(payload),
    });
    Ok(serde_json::to_vec(&frame)?)
}

fn resource_snapshot() -> Option<ResourceSnapshot> {
    Some(ResourceSnapshot {
        cpu_available: 1.0,
        memory_available_mb: 0.0,
        gpu_available: false,
        battery_percent: None,
    })
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "atmosphere-node".to_string())
}
