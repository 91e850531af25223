//! Hashing helpers: BLAKE3 for general-purpose hashing, SHA-256 for the
//! node/mesh ID derivation scheme fixed by the wire format.

pub mod blake3;
pub mod sha256;

pub use blake3::hash_blake3;
pub use sha256::{hash_sha256, node_id_from_public_key, short_id_hex};
