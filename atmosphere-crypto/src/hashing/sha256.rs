//! SHA-256 hashing, used wherever the wire format fixes a hash-based ID
//! scheme (node IDs, mesh IDs, short join codes).

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The first `n` hex characters of a hash's hex encoding.
pub fn short_id_hex(hash: &[u8; 32], n: usize) -> String {
    let hex = hex::encode(hash);
    hex.chars().take(n).collect()
}

/// Node/mesh ID derivation: first 16 hex chars of SHA-256 over the raw
/// public key bytes.
pub fn node_id_from_public_key(public_key: &[u8]) -> String {
    short_id_hex(&hash_sha256(public_key), 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_16_hex_chars() {
        let pk = [3u8; 32];
        let id = node_id_from_public_key(&pk);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_id_is_deterministic() {
        let pk = [3u8; 32];
        assert_eq!(
            node_id_from_public_key(&pk),
            node_id_from_public_key(&pk)
        );
    }

    #[test]
    fn different_keys_yield_different_ids() {
        let a = node_id_from_public_key(&[1u8; 32]);
        let b = node_id_from_public_key(&[2u8; 32]);
        assert_ne!(a, b);
    }
}
