//! LAN transport: mDNS advertisement/discovery plus a direct WebSocket
//! link to each discovered peer. Cheapest transport when it's available,
//! so the manager always prefers it over relay.

use super::{Transport, TransportEvent};
use crate::error::TransportError;
use crate::routing_table::TransportKind;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const SERVICE_TYPE: &str = "_atmosphere._tcp.local.";

struct PeerLink {
    outbound: mpsc::Sender<Vec<u8>>,
}

/// LAN transport backed by `mdns-sd` for discovery and a plain WebSocket
/// per peer for data. Only usable when the host actually has a LAN
/// interface to advertise on.
pub struct LanTransport {
    node_id: String,
    capabilities_csv: String,
    mesh_id: String,
    listen_port: u16,
    daemon: RwLock<Option<ServiceDaemon>>,
    links: RwLock<HashMap<String, PeerLink>>,
    events_tx: mpsc::Sender<TransportEvent>,
    running: AtomicBool,
}

impl LanTransport {
    pub fn new(
        node_id: impl Into<String>,
        mesh_id: impl Into<String>,
        capabilities: &[String],
        listen_port: u16,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            capabilities_csv: capabilities.join(","),
            mesh_id: mesh_id.into(),
            listen_port,
            daemon: RwLock::new(None),
            links: RwLock::new(HashMap::new()),
            events_tx,
            running: AtomicBool::new(false),
        }
    }

    fn advertise(&self) -> anyhow::Result<ServiceDaemon> {
        let daemon = ServiceDaemon::new()?;
        let host_ip = local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| "0.0.0.0".to_string());
        let instance_name = self.node_id.clone();
        let mut properties = HashMap::new();
        properties.insert("node_id".to_string(), self.node_id.clone());
        properties.insert("mesh_id".to_string(), self.mesh_id.clone());
        properties.insert("capabilities".to_string(), self.capabilities_csv.clone());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{instance_name}.local."),
            host_ip,
            self.listen_port,
            properties,
        )?;
        daemon.register(service)?;
        Ok(daemon)
    }

    fn spawn_browser(&self, daemon: &ServiceDaemon) -> anyhow::Result<()> {
        let receiver = daemon.browse(SERVICE_TYPE)?;
        let events_tx = self.events_tx.clone();
        let self_node_id = self.node_id.clone();

        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                if let ServiceEvent::ServiceResolved(info) = event {
                    let Some(peer_id) = info.get_property_val_str("node_id") else {
                        continue;
                    };
                    if peer_id == self_node_id {
                        continue;
                    }
                    let hints: Vec<String> = info
                        .get_addresses()
                        .iter()
                        .map(|addr| format!("{addr}:{}", info.get_port()))
                        .collect();
                    if events_tx
                        .send(TransportEvent::PeerDiscovered {
                            peer_id: peer_id.to_string(),
                            hints,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn spawn_accept_loop(&self) -> anyhow::Result<()> {
        let std_listener = StdTcpListener::bind(("0.0.0.0", self.listen_port))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let events_tx = events_tx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_inbound(stream, addr, events_tx).await {
                                debug!(%addr, error = %err, "inbound LAN connection closed");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "LAN accept loop error");
                        break;
                    }
                }
            }
        });
        Ok(())
    }
}

async fn serve_inbound(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    events_tx: mpsc::Sender<TransportEvent>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (_, mut read) = ws.split();
    let peer_id = addr.to_string();

    while let Some(message) = read.next().await {
        match message? {
            WsMessage::Binary(bytes) => {
                let _ = events_tx
                    .send(TransportEvent::Message { peer_id: peer_id.clone(), bytes })
                    .await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

#[async_trait]
impl Transport for LanTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Lan
    }

    fn estimated_cost_hint(&self) -> f32 {
        0.05
    }

    fn is_available(&self) -> bool {
        self.running.load(Ordering::SeqCst) && local_ip_address::local_ip().is_ok()
    }

    async fn start(&self) -> anyhow::Result<()> {
        if !local_ip_address::local_ip().is_ok() {
            info!("no LAN interface detected, LAN transport stays idle");
            return Ok(());
        }
        let daemon = self.advertise()?;
        self.spawn_browser(&daemon)?;
        self.spawn_accept_loop()?;
        *self.daemon.write() = Some(daemon);
        self.running.store(true, Ordering::SeqCst);
        info!(port = self.listen_port, "LAN transport started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(daemon) = self.daemon.write().take() {
            let _ = daemon.shutdown();
        }
        self.links.write().clear();
        Ok(())
    }

    async fn connect(&self, peer_id: &str, endpoint_hints: &[String]) -> anyhow::Result<()> {
        if self.links.read().contains_key(peer_id) {
            return Ok(());
        }
        let Some(hint) = endpoint_hints.first() else {
            anyhow::bail!("no endpoint hint for peer {peer_id}");
        };
        let url = format!("ws://{hint}");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, _) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if write.send(WsMessage::Binary(bytes)).await.is_err() {
                    break;
                }
            }
        });

        self.links.write().insert(peer_id.to_string(), PeerLink { outbound: outbound_tx });
        let _ = self
            .events_tx
            .send(TransportEvent::PeerConnected { peer_id: peer_id.to_string() })
            .await;
        Ok(())
    }

    async fn disconnect(&self, peer_id: &str) -> anyhow::Result<()> {
        self.links.write().remove(peer_id);
        let _ = self
            .events_tx
            .send(TransportEvent::PeerDisconnected { peer_id: peer_id.to_string() })
            .await;
        Ok(())
    }

    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let outbound = {
            let links = self.links.read();
            links.get(peer_id).map(|link| link.outbound.clone())
        };
        match outbound {
            Some(sender) => sender.send(bytes).await.map_err(|_| TransportError {
                peer_id: peer_id.to_string(),
                transport: "lan".to_string(),
                reason: "outbound channel closed".to_string(),
            }),
            None => Err(TransportError {
                peer_id: peer_id.to_string(),
                transport: "lan".to_string(),
                reason: "no LAN link to peer".to_string(),
            }),
        }
    }

    async fn broadcast(&self, bytes: Vec<u8>) {
        let senders: Vec<_> = self.links.read().values().map(|link| link.outbound.clone()).collect();
        for sender in senders {
            let _ = sender.send(bytes.clone()).await;
        }
    }
}
