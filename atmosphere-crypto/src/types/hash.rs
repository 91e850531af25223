//! Generic 32-byte hash wrapper.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        let len = std::cmp::min(bytes.len(), 32);
        hash[..len].copy_from_slice(&bytes[..len]);
        Hash(hash)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.trim_start_matches("0x");
        let bytes =
            hex::decode(hex_str).map_err(|e| anyhow::anyhow!("invalid hex string: {}", e))?;
        Ok(Hash::from_bytes(&bytes))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
