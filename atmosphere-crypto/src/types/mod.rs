//! Core cryptographic type definitions.

pub mod hash;
pub mod keys;
pub mod signature;

pub use hash::Hash;
pub use keys::{PrivateKey, PublicKey};
pub use signature::Signature;
