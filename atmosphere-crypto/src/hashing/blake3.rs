//! BLAKE3 hashing, used for capability IDs and fast digests that don't
//! need to match the wire-format node/mesh ID scheme.

use blake3::Hasher as Blake3Hasher;

/// Fast cryptographic hash using BLAKE3.
pub fn hash_blake3(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3Hasher::new();
    hasher.update(data);
    hasher.finalize().into()
}
