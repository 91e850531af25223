//! Pluggable embedding backends. `EmbeddingEngine` owns the cache;
//! backends only turn text into raw (unnormalized) vectors.

use anyhow::Result;

/// A text-to-vector backend. Implementations that call out to an
/// external API should fail `embed` rather than return a placeholder —
/// the engine never substitutes zero vectors on its own.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str, dimension: usize) -> Result<Vec<f32>>;
}

/// Deterministic hash-based fallback: character trigrams (weight 1.0)
/// and word unigrams (weight 2.0), each hashed via MD5 of the token's
/// UTF-8 bytes truncated to a little-endian `u64`, modulo `dimension` to
/// pick a vector position. Byte-identical across platforms by
/// construction — no floating-point hashing, no locale-sensitive casing.
pub struct HashEmbeddingBackend;

impl EmbeddingBackend for HashEmbeddingBackend {
    fn embed(&self, text: &str, dimension: usize) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; dimension];
        let lowercase = text.to_lowercase();

        for trigram in char_trigrams(&lowercase) {
            accumulate(&mut vector, &trigram, 1.0);
        }
        for word in lowercase.split_whitespace() {
            accumulate(&mut vector, word, 2.0);
        }

        Ok(vector)
    }
}

fn accumulate(vector: &mut [f32], token: &str, weight: f32) {
    if token.is_empty() {
        return;
    }
    let digest = md5::compute(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    let hash = u64::from_le_bytes(bytes);
    let position = (hash % vector.len() as u64) as usize;
    vector[position] += weight;
}

fn char_trigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 3 {
        return vec![text.to_string()];
    }
    chars
        .windows(3)
        .map(|window| window.iter().collect())
        .collect()
}
