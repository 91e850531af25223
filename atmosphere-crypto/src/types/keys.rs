//! Ed25519 key types for node and mesh identities.
//!
//! Public keys compare in constant time out of defense-in-depth habit
//! carried over from the wider cryptographic module; private keys are
//! zeroized on drop.

use crate::classical::ed25519::{ed25519_sign, ed25519_verify};
use crate::types::Signature;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{compiler_fence, Ordering};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PartialEq for PublicKey {
    #[inline(never)]
    fn eq(&self, other: &Self) -> bool {
        compiler_fence(Ordering::SeqCst);
        let eq: bool = self.0.ct_eq(&other.0).into();
        compiler_fence(Ordering::SeqCst);
        eq
    }
}

impl Eq for PublicKey {}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!("public key must be 32 bytes"));
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(PublicKey(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<bool> {
        ed25519_verify(message, &signature.0, &self.0)
    }
}

#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct PrivateKey(pub [u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!("private key must be 32 bytes"));
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(PrivateKey(buf))
    }

    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let bytes = ed25519_sign(message, &self.0)?;
        Signature::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_equality_is_byte_exact() {
        let a = PublicKey([1u8; 32]);
        let b = PublicKey([1u8; 32]);
        let c = PublicKey([2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn private_key_signs_what_public_key_verifies() {
        let (pk, sk) = crate::classical::ed25519::ed25519_keypair();
        let private = PrivateKey::from_bytes(&sk).unwrap();
        let public = PublicKey::from_bytes(&pk).unwrap();

        let signature = private.sign(b"message").unwrap();
        assert!(public.verify(b"message", &signature).unwrap());
    }
}
