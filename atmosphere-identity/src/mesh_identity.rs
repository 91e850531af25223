//! Mesh identity: a threshold-split master key shared by founding
//! members, identified by the first 16 hex chars of SHA-256 over the
//! master public key.

use crate::node_identity::hardware_fingerprint;
use anyhow::{Context, Result};
use atmosphere_crypto::{
    ed25519_keypair, hashing::node_id_from_public_key, shamir, PrivateKey, PublicKey,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// A founding member of the mesh: holds one Shamir share of the master
/// key plus a separate per-node signing keypair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundingMember {
    pub node_id: String,
    pub public_key: String,
    pub share_index: u8,
    pub capabilities: Vec<String>,
    pub hardware_hash: String,
    pub joined_at: i64,
}

/// Public mesh metadata, the part that's safe to persist and gossip.
/// The master private key never appears here — only founders' local
/// shares, held out-of-band in [`MeshSecrets`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshIdentity {
    pub version: u32,
    pub mesh_id: String,
    pub name: String,
    pub master_public_key: String,
    pub threshold: usize,
    pub total_shares: usize,
    pub founding_members: Vec<FoundingMember>,
    pub created_at: i64,

    #[serde(skip)]
    local_share: Option<(u8, [u8; 32])>,
    #[serde(skip)]
    local_keypair: Option<(PublicKey, PrivateKey)>,
    #[serde(skip)]
    pending_shares: Vec<(u8, [u8; 32])>,
}

/// Secret material that accompanies a [`MeshIdentity`] on disk: this
/// node's Shamir share and (if it is the founder) its local signing
/// keypair. Written to `<mesh-path>.secrets` with owner-only permissions.
#[derive(Debug, Serialize, Deserialize)]
struct MeshSecrets {
    share_index: u8,
    share_data: String,
    node_private_key: Option<String>,
}

impl MeshIdentity {
    /// Create a new mesh: generate a master keypair, split its private
    /// key into `total_shares` Shamir shares (any `threshold` of which
    /// reconstruct it), and record the creator as the first founder
    /// holding share index 1.
    pub fn create(
        name: impl Into<String>,
        threshold: usize,
        total_shares: usize,
        founding_capabilities: Option<Vec<String>>,
    ) -> Result<Self> {
        // A uniformly random Ed25519 secret key is a uniformly random
        // 256-bit value, which lands above the GF(2^255-19) field prime
        // roughly half the time. Resample until it fits rather than
        // feeding Shamir a secret it would reject.
        let (master_pk, secret) = loop {
            let (pk, sk) = ed25519_keypair();
            let mut candidate = [0u8; 32];
            candidate.copy_from_slice(&sk);
            if shamir::fits_field(&candidate) {
                break (pk, candidate);
            }
        };
        let mesh_id = node_id_from_public_key(&master_pk);

        let shares = shamir::split_secret(&secret, threshold, total_shares)
            .context("splitting mesh master key")?;

        let (node_pk, node_sk) = ed25519_keypair();
        let node_public_key = PublicKey::from_bytes(&node_pk)?;
        let node_private_key = PrivateKey::from_bytes(&node_sk)?;
        let founder_node_id = node_id_from_public_key(&node_pk);

        let founder = FoundingMember {
            node_id: founder_node_id,
            public_key: base64_encode(&node_pk),
            share_index: shares[0].0,
            capabilities: founding_capabilities.unwrap_or_else(|| vec!["mesh-admin".to_string()]),
            hardware_hash: hardware_fingerprint(),
            joined_at: now_unix(),
        };

        info!(mesh_id, threshold, total_shares, "mesh identity created");

        Ok(Self {
            version: 1,
            mesh_id,
            name: name.into(),
            master_public_key: base64_encode(&master_pk),
            threshold,
            total_shares,
            founding_members: vec![founder],
            created_at: now_unix(),
            local_share: Some(shares[0]),
            local_keypair: Some((node_public_key, node_private_key)),
            pending_shares: shares[1..].to_vec(),
        })
    }

    /// Does this node hold enough local material (a share and a signing
    /// keypair) to issue membership tokens?
    pub fn can_issue_certificates(&self) -> bool {
        self.local_share.is_some() && self.local_keypair.is_some()
    }

    /// The shares not yet distributed to other founding members.
    pub fn pending_shares(&self) -> &[(u8, [u8; 32])] {
        &self.pending_shares
    }

    /// This node's signing keypair, if it holds one (founders only).
    pub fn local_keypair(&self) -> Option<&(PublicKey, PrivateKey)> {
        self.local_keypair.as_ref()
    }

    pub fn master_public_key_bytes(&self) -> Result<Vec<u8>> {
        base64_decode(&self.master_public_key)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        if let Some((share_index, share_data)) = &self.local_share {
            let secrets_path = secrets_path_for(path);
            let secrets = MeshSecrets {
                share_index: *share_index,
                share_data: hex::encode(share_data),
                node_private_key: self
                    .local_keypair
                    .as_ref()
                    .map(|(_, sk)| hex::encode(sk.0)),
            };
            let secrets_json = serde_json::to_string(&secrets)?;
            std::fs::write(&secrets_path, secrets_json)?;
            restrict_to_owner(&secrets_path)?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut mesh: MeshIdentity = serde_json::from_str(&json)?;

        let secrets_path = secrets_path_for(path);
        if secrets_path.exists() {
            let secrets_json = std::fs::read_to_string(&secrets_path)?;
            let secrets: MeshSecrets = serde_json::from_str(&secrets_json)?;
            let share_data = hex::decode(&secrets.share_data)?;
            let mut share = [0u8; 32];
            share.copy_from_slice(&share_data);
            mesh.local_share = Some((secrets.share_index, share));

            if let Some(sk_hex) = secrets.node_private_key {
                let sk_bytes = hex::decode(sk_hex)?;
                let private_key = PrivateKey::from_bytes(&sk_bytes)?;
                let (pk, _) = ed25519_keypair_from_seed_bytes(&private_key.0);
                mesh.local_keypair = Some((PublicKey::from_bytes(&pk)?, private_key));
            }
        }

        Ok(mesh)
    }
}

fn ed25519_keypair_from_seed_bytes(seed: &[u8; 32]) -> (Vec<u8>, Vec<u8>) {
    atmosphere_crypto::ed25519_keypair_from_seed(seed)
}

fn secrets_path_for(path: &Path) -> std::path::PathBuf {
    let mut secrets = path.as_os_str().to_os_string();
    secrets.push(".secrets");
    std::path::PathBuf::from(secrets)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.decode(s)?)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
