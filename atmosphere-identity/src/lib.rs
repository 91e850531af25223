//! Atmosphere Identity & Credentials
//!
//! Node identities, threshold-split mesh identities, offline-verifiable
//! membership tokens, and parent-signed federation links for hierarchical
//! mesh trust.

pub mod error;
pub mod federation;
pub mod mesh_identity;
pub mod node_identity;
pub mod token;

pub use error::CredentialError;
pub use federation::{FederatedMesh, FederationLink};
pub use mesh_identity::{FoundingMember, MeshIdentity};
pub use node_identity::NodeIdentity;
pub use token::{MeshInvite, MeshToken, TokenStore, TokenVerification};

pub use atmosphere_crypto as crypto;
