//! Relay transport: a WebSocket client to a rendezvous server, used when
//! peers aren't on the same LAN. Reconnects with capped exponential
//! backoff and keeps the link alive with a periodic ping.

use super::{Transport, TransportEvent};
use crate::error::TransportError;
use crate::routing_table::TransportKind;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const BACKOFF_STEPS_SECS: &[u64] = &[2, 4, 8, 16, 30];
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// WebSocket relay transport. All peers registered with the same relay
/// server appear reachable through it, at a higher cost hint than LAN.
pub struct RelayTransport {
    node_id: String,
    mesh_id: String,
    relay_url: String,
    outbound: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    connected: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    stop_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl RelayTransport {
    pub fn new(
        node_id: impl Into<String>,
        mesh_id: impl Into<String>,
        relay_url: impl Into<String>,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            mesh_id: mesh_id.into(),
            relay_url: relay_url.into(),
            outbound: RwLock::new(None),
            connected: AtomicBool::new(false),
            events_tx,
            stop_tx: RwLock::new(None),
        }
    }

    async fn run_connection_loop(
        relay_url: String,
        node_id: String,
        mesh_id: String,
        outbound_slot: Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>,
        connected: Arc<AtomicBool>,
        events_tx: mpsc::Sender<TransportEvent>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut backoff_idx = 0usize;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => return,
                result = Self::connect_once(&relay_url, &node_id, &mesh_id, &outbound_slot, &connected, &events_tx) => {
                    connected.store(false, Ordering::SeqCst);
                    *outbound_slot.write() = None;
                    match result {
                        Ok(()) => {
                            info!(relay = %relay_url, "relay connection closed cleanly, reconnecting");
                            backoff_idx = 0;
                        }
                        Err(err) => {
                            warn!(relay = %relay_url, error = %err, "relay connection failed");
                        }
                    }
                    let delay = BACKOFF_STEPS_SECS
                        .get(backoff_idx)
                        .copied()
                        .unwrap_or(*BACKOFF_STEPS_SECS.last().unwrap());
                    backoff_idx = (backoff_idx + 1).min(BACKOFF_STEPS_SECS.len() - 1);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = stop_rx.recv() => return,
                    }
                }
            }
        }
    }

    async fn connect_once(
        relay_url: &str,
        node_id: &str,
        mesh_id: &str,
        outbound_slot: &Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>,
        connected: &Arc<AtomicBool>,
        events_tx: &mpsc::Sender<TransportEvent>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(relay_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let register = serde_json::json!({
            "type": "register",
            "node_id": node_id,
            "mesh_id": mesh_id,
        });
        write.send(WsMessage::Text(register.to_string())).await?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);
        *outbound_slot.write() = Some(outbound_tx);
        connected.store(true, Ordering::SeqCst);

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(bytes) => write.send(WsMessage::Binary(bytes)).await?,
                        None => return Ok(()),
                    }
                }
                _ = keepalive.tick() => {
                    write.send(WsMessage::Ping(Vec::new())).await?;
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            let _ = events_tx
                                .send(TransportEvent::Message { peer_id: "relay".to_string(), bytes })
                                .await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn estimated_cost_hint(&self) -> f32 {
        0.5
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start(&self) -> anyhow::Result<()> {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        *self.stop_tx.write() = Some(stop_tx);

        let relay_url = self.relay_url.clone();
        let node_id = self.node_id.clone();
        let mesh_id = self.mesh_id.clone();
        let outbound_slot = Arc::new(RwLock::new(None));
        *self.outbound.write() = None;
        let connected = Arc::new(AtomicBool::new(false));
        let events_tx = self.events_tx.clone();

        tokio::spawn(Self::run_connection_loop(
            relay_url,
            node_id,
            mesh_id,
            outbound_slot,
            connected,
            events_tx,
            stop_rx,
        ));
        debug!("relay connection loop spawned");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let stop_tx = self.stop_tx.write().take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(()).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.write() = None;
        Ok(())
    }

    async fn connect(&self, _peer_id: &str, _endpoint_hints: &[String]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disconnect(&self, _peer_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let outbound = self.outbound.read().clone();
        match outbound {
            Some(sender) => sender.send(bytes).await.map_err(|_| TransportError {
                peer_id: peer_id.to_string(),
                transport: "relay".to_string(),
                reason: "relay outbound channel closed".to_string(),
            }),
            None => Err(TransportError {
                peer_id: peer_id.to_string(),
                transport: "relay".to_string(),
                reason: "not connected to relay".to_string(),
            }),
        }
    }

    async fn broadcast(&self, bytes: Vec<u8>) {
        let outbound = self.outbound.read().clone();
        if let Some(sender) = outbound {
            let _ = sender.send(bytes).await;
        }
    }
}
