//! Membership tokens: offline-verifiable proof that a node was issued
//! capabilities by a mesh, plus the invite envelope used to bootstrap a
//! new node into a mesh over a deep link.

use crate::CredentialError;
use anyhow::{anyhow, Context, Result};
use atmosphere_crypto::{ed25519_sign, ed25519_verify, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const MAX_TOKEN_TTL_SECS: i64 = 7 * 86400;

/// A signed grant of capabilities within a mesh, valid until `expires_at`
/// and bound to a specific node unless `node_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshToken {
    pub mesh_id: String,
    pub node_id: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub capabilities: Vec<String>,
    pub issuer_id: String,
    pub nonce: String,
    pub signature: Vec<u8>,
}

impl MeshToken {
    /// Build and sign a token. `ttl_secs` is capped at seven days.
    pub fn create(
        mesh_id: impl Into<String>,
        node_id: Option<String>,
        mut capabilities: Vec<String>,
        issuer_id: impl Into<String>,
        issuer_private_key: &PrivateKey,
        ttl_secs: i64,
    ) -> Result<Self> {
        capabilities.sort();
        let issued_at = now_unix();
        let ttl = ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS);

        let mut token = Self {
            mesh_id: mesh_id.into(),
            node_id,
            issued_at,
            expires_at: issued_at + ttl,
            capabilities,
            issuer_id: issuer_id.into(),
            nonce: random_nonce(),
            signature: Vec::new(),
        };

        let message = token.canonical_bytes();
        token.signature = ed25519_sign(&message, &issuer_private_key.0)?;
        Ok(token)
    }

    /// The exact bytes that get signed: a compact JSON object with keys
    /// in sorted order and a sorted capability list, so two independently
    /// constructed tokens with the same fields sign identically.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut sorted_capabilities = self.capabilities.clone();
        sorted_capabilities.sort();

        let value = json!({
            "capabilities": sorted_capabilities,
            "expires_at": self.expires_at,
            "issued_at": self.issued_at,
            "issuer_id": self.issuer_id,
            "mesh_id": self.mesh_id,
            "node_id": self.node_id,
            "nonce": self.nonce,
        });
        serde_json::to_vec(&value).expect("token fields always serialize")
    }

    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }

    pub fn is_valid_for_node(&self, node_id: &str) -> bool {
        match &self.node_id {
            Some(bound) => bound == node_id,
            None => true,
        }
    }

    /// Verify the signature against the mesh's issuer public key. Does
    /// not check expiry, node binding, or replay — callers that need the
    /// full contract should go through [`TokenStore::verify_token`].
    pub fn verify(&self, issuer_public_key: &PublicKey) -> Result<bool> {
        let message = self.canonical_bytes();
        ed25519_verify(&message, &self.signature, issuer_public_key.as_bytes())
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64_url_encode(&json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = base64_url_decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// A bootstrap envelope for joining a mesh: a token plus enough network
/// metadata to reach the mesh without prior knowledge of it. Rendered as
/// an `atmosphere://join?invite=...` deep link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshInvite {
    pub token: MeshToken,
    pub mesh_name: String,
    pub endpoints: Vec<String>,
    pub mesh_public_key: String,
    /// Signature over `mesh_id`'s bytes from the mesh's master key,
    /// carried so a joining node can call `TokenStore::register_mesh`
    /// without any prior relationship to the mesh.
    pub founder_proof: Vec<u8>,
}

impl MeshInvite {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64_url_encode(&json))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = base64_url_decode(encoded)?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn to_deep_link(&self) -> Result<String> {
        Ok(format!("atmosphere://join?invite={}", self.encode()?))
    }

    pub fn from_deep_link(link: &str) -> Result<Self> {
        let query = link
            .split_once("invite=")
            .map(|(_, rest)| rest)
            .ok_or_else(|| anyhow!("deep link missing invite parameter"))?;
        let encoded = query.split('&').next().unwrap_or(query);
        Self::decode(encoded)
    }
}

/// Outcome of validating a token against a node's binding and a mesh's
/// registered keys and replay history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVerification {
    Ok,
    Expired,
    WrongNode,
    Replay,
    UnknownMesh,
    BadSignature,
}

/// Tracks registered mesh issuer keys and consumed nonces so tokens can't
/// be replayed. One store per node; not shared across meshes.
#[derive(Debug, Default)]
pub struct TokenStore {
    mesh_keys: HashMap<String, Vec<u8>>,
    used_nonces: HashSet<String>,
    nonce_expiry: HashMap<String, i64>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mesh's issuer public key, proven by a signature over
    /// the mesh ID bytes from the mesh's own private key. Returns `false`
    /// if the mesh is already registered or the proof doesn't verify.
    pub fn register_mesh(
        &mut self,
        mesh_id: &str,
        public_key: &PublicKey,
        founder_proof: &[u8],
    ) -> Result<bool> {
        if self.mesh_keys.contains_key(mesh_id) {
            return Ok(false);
        }
        let verified = ed25519_verify(mesh_id.as_bytes(), founder_proof, public_key.as_bytes())
            .context("verifying founder proof")?;
        if !verified {
            return Ok(false);
        }
        self.mesh_keys
            .insert(mesh_id.to_string(), public_key.as_bytes().to_vec());
        Ok(true)
    }

    pub fn get_mesh_key(&self, mesh_id: &str) -> Option<&Vec<u8>> {
        self.mesh_keys.get(mesh_id)
    }

    /// The full verification contract, checked in order: expiry, node
    /// binding, replay, mesh registration, then signature. The nonce is
    /// marked used only once every earlier check has passed.
    pub fn verify_token(&mut self, token: &MeshToken, node_id: &str) -> TokenVerification {
        if token.is_expired() {
            return TokenVerification::Expired;
        }
        if !token.is_valid_for_node(node_id) {
            return TokenVerification::WrongNode;
        }
        if self.used_nonces.contains(&token.nonce) {
            return TokenVerification::Replay;
        }
        let Some(issuer_key) = self.mesh_keys.get(&token.mesh_id) else {
            return TokenVerification::UnknownMesh;
        };
        let Ok(public_key) = PublicKey::from_bytes(issuer_key) else {
            return TokenVerification::BadSignature;
        };
        match token.verify(&public_key) {
            Ok(true) => {
                self.used_nonces.insert(token.nonce.clone());
                self.nonce_expiry
                    .insert(token.nonce.clone(), token.expires_at);
                debug!(mesh_id = %token.mesh_id, node_id, "token verified");
                TokenVerification::Ok
            }
            _ => {
                warn!(mesh_id = %token.mesh_id, node_id, "token signature rejected");
                TokenVerification::BadSignature
            }
        }
    }

    /// Drop nonces whose owning token has since expired, so this store
    /// doesn't grow without bound over the mesh's lifetime.
    pub fn cleanup_expired_nonces(&mut self) {
        let now = now_unix();
        let expired: Vec<String> = self
            .nonce_expiry
            .iter()
            .filter(|(_, &expiry)| expiry <= now)
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in expired {
            self.nonce_expiry.remove(&nonce);
            self.used_nonces.remove(&nonce);
        }
    }
}

impl TokenVerification {
    /// Map to the credential error a caller should surface, if any.
    pub fn into_result(self, mesh_id: &str) -> Result<(), CredentialError> {
        match self {
            TokenVerification::Ok => Ok(()),
            TokenVerification::Expired => Err(CredentialError::Expired),
            TokenVerification::WrongNode => Err(CredentialError::WrongNode),
            TokenVerification::Replay => Err(CredentialError::Replay),
            TokenVerification::UnknownMesh => {
                Err(CredentialError::UnknownMesh(mesh_id.to_string()))
            }
            TokenVerification::BadSignature => Err(CredentialError::BadSignature),
        }
    }
}

fn base64_url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))?)
}

/// A 12-character base32 short code for human-dictated mesh joining,
/// derived from the mesh ID and the first bytes of its public key.
/// Rendered grouped as `XXXX-XXXX-XXXX`.
pub fn short_join_code(mesh_id: &str, mesh_public_key: &[u8]) -> String {
    let prefix = &mesh_public_key[..mesh_public_key.len().min(16)];
    let input = format!("{mesh_id}:{}", hex::encode(prefix));
    let hash = atmosphere_crypto::hashing::hash_sha256(input.as_bytes());
    let encoded = data_encoding::BASE32_NOPAD.encode(&hash[..9]);
    let code: String = encoded.chars().take(12).collect();

    code.as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

fn random_nonce() -> String {
    use rand::RngCore;
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
