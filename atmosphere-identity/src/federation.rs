//! Federation links between meshes: a parent mesh delegates a capped
//! capability set to a child mesh with a single signature, verifiable
//! offline using only the parent's public key.

use crate::mesh_identity::MeshIdentity;
use anyhow::{anyhow, Result};
use atmosphere_crypto::{ed25519_sign, ed25519_verify};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// A parent-signed statement granting a child mesh a capped set of
/// capabilities. Carries everything needed to verify it without
/// contacting the parent: the nested fields it was signed over plus the
/// signature itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationLink {
    pub child_mesh_id: String,
    pub child_mesh_name: String,
    pub child_public_key: String,
    pub parent_mesh_id: String,
    pub parent_mesh_name: String,
    pub parent_public_key: String,
    pub allowed_capabilities: Vec<String>,
    pub max_tier: String,
    pub can_create_children: bool,
    pub created_at: i64,
    pub expires_at: i64,
    pub parent_signature: Vec<u8>,
}

impl FederationLink {
    /// `expires_at == 0` means the link never expires.
    pub fn is_expired(&self) -> bool {
        self.expires_at != 0 && now_unix() >= self.expires_at
    }

    /// Reconstruct the exact nested structure the parent signed and
    /// verify it against the parent's own public key. No network access.
    pub fn verify(&self) -> Result<bool> {
        let message = self.link_data();
        let parent_key = base64_decode(&self.parent_public_key)?;
        ed25519_verify(&message, &self.parent_signature, &parent_key)
    }

    fn link_data(&self) -> Vec<u8> {
        let value = json!({
            "child": {
                "mesh_id": self.child_mesh_id,
                "mesh_name": self.child_mesh_name,
                "public_key": self.child_public_key,
            },
            "parent": {
                "mesh_id": self.parent_mesh_id,
                "mesh_name": self.parent_mesh_name,
                "public_key": self.parent_public_key,
            },
            "permissions": {
                "allowed_capabilities": self.allowed_capabilities,
                "can_create_children": self.can_create_children,
                "max_tier": self.max_tier,
            },
            "validity": {
                "created_at": self.created_at,
                "expires_at": self.expires_at,
            },
        });
        serde_json::to_vec(&value).expect("link fields always serialize")
    }
}

/// A mesh's place in a federation hierarchy: at most one parent link,
/// any number of child links it has issued.
#[derive(Debug)]
pub struct FederatedMesh {
    mesh: MeshIdentity,
    parent_link: Option<FederationLink>,
    child_links: HashMap<String, FederationLink>,
}

impl FederatedMesh {
    pub fn new(mesh: MeshIdentity) -> Self {
        Self {
            mesh,
            parent_link: None,
            child_links: HashMap::new(),
        }
    }

    pub fn mesh(&self) -> &MeshIdentity {
        &self.mesh
    }

    pub fn parent_link(&self) -> Option<&FederationLink> {
        self.parent_link.as_ref()
    }

    pub fn child_links(&self) -> &HashMap<String, FederationLink> {
        &self.child_links
    }

    pub fn is_root(&self) -> bool {
        self.parent_link.is_none()
    }

    /// The chain from root to this mesh: just this mesh's ID if root,
    /// otherwise the parent's ID followed by this one.
    pub fn federation_path(&self) -> Vec<String> {
        match &self.parent_link {
            None => vec![self.mesh.mesh_id.clone()],
            Some(link) => vec![link.parent_mesh_id.clone(), self.mesh.mesh_id.clone()],
        }
    }

    /// Sign and mint a link delegating capabilities to `child_mesh`.
    /// Requires this mesh to hold a local signing keypair (a founder).
    /// `expires_in_days == 0` produces a link that never expires.
    pub fn create_child_mesh(
        &mut self,
        child_mesh: &MeshIdentity,
        allowed_capabilities: Vec<String>,
        max_tier: impl Into<String>,
        can_create_children: bool,
        expires_in_days: i64,
    ) -> Result<FederationLink> {
        let (_, parent_private_key) = self
            .mesh
            .local_keypair()
            .ok_or_else(|| anyhow!("mesh holds no local signing keypair, cannot issue links"))?;

        let created_at = now_unix();
        let expires_at = if expires_in_days <= 0 {
            0
        } else {
            created_at + expires_in_days * 86400
        };

        let mut link = FederationLink {
            child_mesh_id: child_mesh.mesh_id.clone(),
            child_mesh_name: child_mesh.name.clone(),
            child_public_key: child_mesh.master_public_key.clone(),
            parent_mesh_id: self.mesh.mesh_id.clone(),
            parent_mesh_name: self.mesh.name.clone(),
            parent_public_key: self.mesh.master_public_key.clone(),
            allowed_capabilities,
            max_tier: max_tier.into(),
            can_create_children,
            created_at,
            expires_at,
            parent_signature: Vec::new(),
        };

        let message = link.link_data();
        link.parent_signature = ed25519_sign(&message, &parent_private_key.0)?;

        self.child_links
            .insert(link.child_mesh_id.clone(), link.clone());
        info!(child_mesh_id = %link.child_mesh_id, parent_mesh_id = %link.parent_mesh_id, "federation link issued");
        Ok(link)
    }

    /// Accept a link issued to this mesh by a parent: check it names us
    /// and verifies against the parent's own key, then adopt it.
    pub fn accept_parent_link(&mut self, link: FederationLink) -> Result<()> {
        if link.child_mesh_id != self.mesh.mesh_id {
            return Err(anyhow!("federation link issued to a different mesh"));
        }
        if !link.verify()? {
            return Err(anyhow!("federation link signature does not verify"));
        }
        self.parent_link = Some(link);
        Ok(())
    }

    /// Federated meshes always keep operating when the parent is
    /// unreachable: local token issuance and verification never depend
    /// on a live parent connection.
    pub fn can_operate_disconnected(&self) -> bool {
        true
    }

    /// What remains available while disconnected from the parent.
    /// Cross-mesh token issuance and revocation propagation need the
    /// parent; everything else is local.
    pub fn get_disconnected_capabilities(&self) -> HashMap<String, bool> {
        let mut caps = HashMap::new();
        caps.insert("issue_local_tokens".to_string(), true);
        caps.insert("verify_local_tokens".to_string(), true);
        caps.insert("verify_parent_tokens".to_string(), true);
        caps.insert("issue_cross_mesh_tokens".to_string(), false);
        caps.insert(
            "create_child_mesh".to_string(),
            self.parent_link
                .as_ref()
                .map(|link| link.can_create_children)
                .unwrap_or(true),
        );
        caps.insert("revoke_local_devices".to_string(), true);
        caps.insert("propagate_revocations".to_string(), false);
        caps
    }
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.decode(s)?)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
