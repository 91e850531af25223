//! Ed25519 signing for node and mesh master keys.

use anyhow::Result;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};

/// Generate a fresh Ed25519 keypair. Returns `(public_key, secret_key)`.
pub fn ed25519_keypair() -> (Vec<u8>, Vec<u8>) {
    let mut rng = OsRng;
    let mut sk_bytes = [0u8; 32];
    rng.fill_bytes(&mut sk_bytes);

    let signing_key = SigningKey::from_bytes(&sk_bytes);
    let verifying_key = signing_key.verifying_key();

    (
        verifying_key.as_bytes().to_vec(),
        signing_key.as_bytes().to_vec(),
    )
}

/// Derive an Ed25519 keypair deterministically from a 32-byte seed.
pub fn ed25519_keypair_from_seed(seed: &[u8; 32]) -> (Vec<u8>, Vec<u8>) {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();

    (
        verifying_key.as_bytes().to_vec(),
        signing_key.as_bytes().to_vec(),
    )
}

/// Sign `message` with a raw 32-byte Ed25519 secret key.
pub fn ed25519_sign(message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
    if secret_key.len() != 32 {
        return Err(anyhow::anyhow!("invalid Ed25519 secret key length"));
    }

    let mut sk_bytes = [0u8; 32];
    sk_bytes.copy_from_slice(&secret_key[..32]);
    let signing_key = SigningKey::from_bytes(&sk_bytes);

    let signature = signing_key.sign(message);
    Ok(signature.to_bytes().to_vec())
}

/// Verify an Ed25519 signature against a raw 32-byte public key.
pub fn ed25519_verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    if signature.len() != 64 {
        return Ok(false);
    }

    if public_key.len() != 32 {
        return Ok(false);
    }

    let sig = match Ed25519Signature::try_from(&signature[..64]) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let mut pk_bytes = [0u8; 32];
    pk_bytes.copy_from_slice(&public_key[..32]);
    let verifying_key = match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(key) => key,
        Err(_) => return Ok(false),
    };

    Ok(verifying_key.verify(message, &sig).is_ok())
}
