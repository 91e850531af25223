//! Node-wide runtime configuration. One struct, constructed once and
//! threaded through constructors — no global config cell.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every runtime-variable knob the core reads. Persisted to
/// `config.json` in the node's state directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub relay_url: Option<String>,
    pub mdns_enabled: bool,

    pub gossip_interval_secs: u64,
    pub announcement_ttl: u8,
    pub max_capabilities_per_envelope: usize,

    pub gradient_table_capacity: usize,
    pub gradient_entry_ttl_secs: u64,
    pub routing_table_staleness_secs: u64,

    pub match_threshold: f32,
    pub min_route_threshold: f32,

    pub embedding_cache_capacity: usize,
    pub embedding_dimension: usize,

    pub nonce_cache_ttl_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: crate::DEFAULT_LISTEN_PORT,
            relay_url: None,
            mdns_enabled: true,

            gossip_interval_secs: 30,
            announcement_ttl: 10,
            max_capabilities_per_envelope: 50,

            gradient_table_capacity: 1000,
            gradient_entry_ttl_secs: 300,
            routing_table_staleness_secs: 300,

            match_threshold: 0.75,
            min_route_threshold: 0.50,

            embedding_cache_capacity: 1000,
            embedding_dimension: crate::DEFAULT_EMBEDDING_DIM,

            nonce_cache_ttl_secs: 300,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&json).context("parsing node config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

/// The default persisted-state directory, `~/.atmosphere/`.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atmosphere")
}
