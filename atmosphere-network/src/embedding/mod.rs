//! Text embedding with a bounded, first-inserted-eviction cache.
//!
//! The engine never substitutes zero vectors on backend failure — it
//! fails the call outright, so a silent zero vector never corrupts a
//! similarity ranking downstream.

mod backend;

pub use backend::{EmbeddingBackend, HashEmbeddingBackend};

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Cache key length: the first 200 characters of the input text.
const CACHE_KEY_CHARS: usize = 200;

/// Turns text into L2-normalized vectors and caches the result for the
/// lifetime of the process. Shared across the node behind an `Arc`.
pub struct EmbeddingEngine {
    backend: Arc<dyn EmbeddingBackend>,
    dimension: usize,
    cache: Mutex<Cache>,
}

struct Cache {
    capacity: usize,
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, Vec<f32>>,
}

impl EmbeddingEngine {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, dimension: usize, cache_capacity: usize) -> Self {
        Self {
            backend,
            dimension,
            cache: Mutex::new(Cache {
                capacity: cache_capacity.max(1),
                order: VecDeque::new(),
                entries: std::collections::HashMap::new(),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `text`, consulting and populating the cache. Returns a
    /// unit-length vector when `normalize` is true.
    pub fn embed(&self, text: &str, normalize: bool) -> Result<Vec<f32>> {
        let key: String = text.chars().take(CACHE_KEY_CHARS).collect();

        if let Some(cached) = self.cache.lock().entries.get(&key).cloned() {
            return Ok(cached);
        }

        let mut vector = self.backend.embed(text, self.dimension)?;
        if normalize {
            l2_normalize(&mut vector);
        }

        let mut cache = self.cache.lock();
        if !cache.entries.contains_key(&key) {
            if cache.order.len() >= cache.capacity {
                if let Some(oldest) = cache.order.pop_front() {
                    cache.entries.remove(&oldest);
                }
            }
            cache.order.push_back(key.clone());
            cache.entries.insert(key, vector.clone());
        }

        Ok(vector)
    }

    pub fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text, normalize)).collect()
    }
}

/// Cosine similarity between two unit-length vectors: a plain dot
/// product once both sides are normalized.
pub fn cos(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rank `query` against the rows of `matrix` (each row length `query.len()`),
/// returning one similarity score per row in row order.
pub fn rank_against_matrix(query: &[f32], matrix: &[Vec<f32>]) -> Vec<f32> {
    matrix.iter().map(|row| cos(query, row)).collect()
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_caches_identical_input() {
        let engine = EmbeddingEngine::new(Arc::new(HashEmbeddingBackend), 32, 10);
        let first = engine.embed("hello mesh", true).unwrap();
        let second = engine.embed("hello mesh", true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn normalized_vectors_are_unit_length() {
        let engine = EmbeddingEngine::new(Arc::new(HashEmbeddingBackend), 32, 10);
        let vector = engine.embed("describe this photo", true).unwrap();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn cache_evicts_first_inserted_when_full() {
        let engine = EmbeddingEngine::new(Arc::new(HashEmbeddingBackend), 32, 2);
        engine.embed("a", true).unwrap();
        engine.embed("b", true).unwrap();
        engine.embed("c", true).unwrap();
        let cache = engine.cache.lock();
        assert_eq!(cache.entries.len(), 2);
        assert!(!cache.entries.contains_key("a"));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let mut v = vec![1.0, 2.0, 3.0];
        l2_normalize(&mut v);
        assert!((cos(&v, &v) - 1.0).abs() < 1e-6);
    }
}
