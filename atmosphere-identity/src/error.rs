//! Credential error types.

use std::fmt;

/// Errors surfaced at the join/credential boundary. Never retried silently
/// by callers — each variant is terminal and expects a fresh credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The token's `expires_at` is in the past.
    Expired,
    /// The token's nonce has already been consumed.
    Replay,
    /// The token names a different node than the one presenting it.
    WrongNode,
    /// Signature did not verify against the mesh master public key.
    BadSignature,
    /// The token names a mesh this store has no record of.
    UnknownMesh(String),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Expired => write!(f, "token expired"),
            CredentialError::Replay => write!(f, "token nonce already used (replay)"),
            CredentialError::WrongNode => write!(f, "token bound to a different node"),
            CredentialError::BadSignature => write!(f, "invalid token signature"),
            CredentialError::UnknownMesh(mesh_id) => write!(f, "mesh not registered: {mesh_id}"),
        }
    }
}

impl std::error::Error for CredentialError {}
