//! Node identity: an Ed25519 keypair plus the metadata persisted
//! alongside it.
//!
//! The node ID is derived, never assigned: it is the first 16 hex
//! characters of SHA-256 over the raw public key bytes. Two nodes can
//! never collide on ID without colliding on key, which they won't.

use anyhow::{Context, Result};
use atmosphere_crypto::{
    ed25519_keypair, ed25519_sign, hashing::node_id_from_public_key, PrivateKey, PublicKey,
    Signature,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// A node's identity in the Atmosphere mesh: its signing keypair and the
/// metadata that travels with it in announcements and founder records.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    private_key: PrivateKey,
    public_key: PublicKey,
    pub name: String,
    pub hardware_hash: String,
    pub created_at: i64,
}

/// On-disk form of [`NodeIdentity`]. Written with owner-only permissions;
/// the private key never leaves this file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedNodeIdentity {
    private_key: String,
    name: String,
    hardware_hash: String,
    created_at: i64,
}

impl NodeIdentity {
    /// Generate a fresh node identity with a random Ed25519 keypair and
    /// the local hardware fingerprint.
    pub fn generate(name: impl Into<String>) -> Self {
        let (pk, sk) = ed25519_keypair();
        Self {
            private_key: PrivateKey::from_bytes(&sk).expect("ed25519 secret key is 32 bytes"),
            public_key: PublicKey::from_bytes(&pk).expect("ed25519 public key is 32 bytes"),
            name: name.into(),
            hardware_hash: hardware_fingerprint(),
            created_at: now_unix(),
        }
    }

    /// The node ID: first 16 hex chars of SHA-256 over the public key.
    pub fn node_id(&self) -> String {
        node_id_from_public_key(self.public_key.as_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign a message with this node's private key.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let bytes = ed25519_sign(message, &self.private_key.0)?;
        Signature::from_bytes(&bytes)
    }

    /// Persist the identity to `path` with owner-only permissions on Unix.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating identity directory {}", parent.display()))?;
        }

        let persisted = PersistedNodeIdentity {
            private_key: hex::encode(self.private_key.0),
            name: self.name.clone(),
            hardware_hash: self.hardware_hash.clone(),
            created_at: self.created_at,
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        restrict_to_owner(path)?;
        Ok(())
    }

    /// Load a previously saved identity.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let persisted: PersistedNodeIdentity = serde_json::from_str(&json)?;
        let sk_bytes = hex::decode(&persisted.private_key)?;
        let private_key = PrivateKey::from_bytes(&sk_bytes)?;
        let (pk, _) = atmosphere_crypto::ed25519_keypair_from_seed(&private_key.0);
        let public_key = PublicKey::from_bytes(&pk)?;

        Ok(Self {
            private_key,
            public_key,
            name: persisted.name,
            hardware_hash: persisted.hardware_hash,
            created_at: persisted.created_at,
        })
    }
}

/// A stable fingerprint over hostname, architecture, and (where
/// available) a platform UUID. Used to recognize the same physical
/// device across reinstalls without being a secret.
pub fn hardware_fingerprint() -> String {
    let hostname = hostname_or_default();
    let arch = std::env::consts::ARCH;
    let os = std::env::consts::OS;

    let mut components = vec![hostname, arch.to_string(), os.to_string()];
    if let Some(uuid) = platform_uuid() {
        components.push(uuid);
    }

    let combined = components.join("|");
    hex::encode(atmosphere_crypto::hashing::hash_sha256(
        combined.as_bytes(),
    ))
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "atmosphere-node".to_string())
}

#[cfg(target_os = "macos")]
fn platform_uuid() -> Option<String> {
    use std::process::Command;
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth_back(1))
        .map(|s| s.to_string())
}

#[cfg(not(target_os = "macos"))]
fn platform_uuid() -> Option<String> {
    None
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_derived_from_public_key() {
        let identity = NodeIdentity::generate("test-node");
        let expected = node_id_from_public_key(identity.public_key().as_bytes());
        assert_eq!(identity.node_id(), expected);
    }

    #[test]
    fn sign_round_trips_through_public_key() {
        let identity = NodeIdentity::generate("test-node");
        let signature = identity.sign(b"hello mesh").unwrap();
        assert!(identity
            .public_key()
            .verify(b"hello mesh", &signature)
            .unwrap());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("atmosphere-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("identity.json");

        let identity = NodeIdentity::generate("roundtrip-node");
        identity.save(&path).unwrap();
        let loaded = NodeIdentity::load(&path).unwrap();

        assert_eq!(identity.node_id(), loaded.node_id());
        assert_eq!(identity.name, loaded.name);

        std::fs::remove_dir_all(&dir).ok();
    }
}
