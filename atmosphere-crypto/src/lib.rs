//! Atmosphere cryptographic foundation.
//!
//! Ed25519 signing for node and mesh identities, Shamir secret sharing
//! for threshold-split mesh master keys, and the hashing primitives used
//! to derive node/mesh IDs and short join codes.

pub mod classical;
pub mod hashing;
pub mod shamir;
pub mod types;

pub use classical::ed25519::{
    ed25519_keypair, ed25519_keypair_from_seed, ed25519_sign, ed25519_verify,
};
pub use hashing::{hash_blake3, hash_sha256, node_id_from_public_key, short_id_hex};
pub use shamir::{combine_shares, split_secret, ShamirError};
pub use types::{PrivateKey, PublicKey, Signature};
