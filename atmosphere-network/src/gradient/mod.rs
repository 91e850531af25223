//! Gradient table: capability ID → best known route, learned from
//! gossip and queried by the semantic router. Owned exclusively by this
//! module; other components read it only through these methods.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Decay base for hop-based confidence: `0.95^hops`.
const CONFIDENCE_DECAY: f32 = 0.95;

/// One known route to a capability somewhere in the mesh.
#[derive(Debug, Clone)]
pub struct GradientEntry {
    pub capability_id: String,
    pub label: String,
    pub embedding: Vec<f32>,
    pub hops: u32,
    pub next_hop: String,
    pub via: String,
    pub estimated_latency_ms: Option<f32>,
    pub last_updated: i64,
}

impl GradientEntry {
    pub fn confidence(&self) -> f32 {
        CONFIDENCE_DECAY.powi(self.hops as i32)
    }
}

/// Aggregate counters mirrored in routine debug logs.
#[derive(Debug, Clone, Default)]
pub struct GradientStats {
    pub entry_count: usize,
    pub capacity: usize,
}

struct Inner {
    entries: HashMap<String, GradientEntry>,
    matrix: Vec<Vec<f32>>,
    matrix_ids: Vec<String>,
    dirty: bool,
    capacity: usize,
    ttl_secs: u64,
}

/// Capability-level gradient table. Cheap to clone the handle — state
/// lives behind an `Arc`-free `RwLock` owned by a single instance shared
/// through `&GradientTable` references.
pub struct GradientTable {
    inner: RwLock<Inner>,
}

impl GradientTable {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                matrix: Vec::new(),
                matrix_ids: Vec::new(),
                dirty: false,
                capacity: capacity.max(1),
                ttl_secs,
            }),
        }
    }

    /// Adopt a new route iff it has strictly fewer hops, or the same
    /// hops via the same next-hop (timestamp refresh only). Returns
    /// whether the table changed.
    pub fn update(
        &self,
        capability_id: &str,
        label: &str,
        vector: Vec<f32>,
        hops: u32,
        next_hop: &str,
        via: &str,
        estimated_latency_ms: Option<f32>,
    ) -> bool {
        let now = now_unix();
        let mut inner = self.inner.write();

        let should_insert = match inner.entries.get(capability_id) {
            None => true,
            Some(existing) => hops < existing.hops,
        };
        let should_refresh_only = !should_insert
            && inner
                .entries
                .get(capability_id)
                .map(|e| e.hops == hops && e.next_hop == next_hop)
                .unwrap_or(false);

        if should_insert {
            if !inner.entries.contains_key(capability_id) && inner.entries.len() >= inner.capacity {
                evict_worst(&mut inner);
            }
            inner.entries.insert(
                capability_id.to_string(),
                GradientEntry {
                    capability_id: capability_id.to_string(),
                    label: label.to_string(),
                    embedding: vector,
                    hops,
                    next_hop: next_hop.to_string(),
                    via: via.to_string(),
                    estimated_latency_ms,
                    last_updated: now,
                },
            );
            inner.dirty = true;
        } else if should_refresh_only {
            if let Some(entry) = inner.entries.get_mut(capability_id) {
                entry.last_updated = now;
            }
        }

        should_insert
    }

    pub fn remove(&self, capability_id: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(capability_id).is_some();
        if removed {
            inner.dirty = true;
        }
        removed
    }

    /// Drop every entry whose next-hop is `node_id`. Called on peer loss.
    pub fn invalidate_node(&self, node_id: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.next_hop != node_id);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.dirty = true;
        }
        removed
    }

    pub fn prune_expired(&self) -> usize {
        let now = now_unix();
        let mut inner = self.inner.write();
        let ttl = inner.ttl_secs as i64;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now - entry.last_updated <= ttl);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.dirty = true;
        }
        removed
    }

    /// Rebuild the similarity matrix if dirty, rank by `similarity ·
    /// confidence`, and return the top entry if it meets `min_score`.
    pub fn find_best_route(&self, intent_vec: &[f32], min_score: f32) -> Option<GradientEntry> {
        let mut inner = self.inner.write();
        if inner.dirty {
            rebuild_matrix(&mut inner);
        }

        let mut best: Option<(f32, usize)> = None;
        for (idx, row) in inner.matrix.iter().enumerate() {
            let sim = crate::embedding::cos(intent_vec, row);
            let id = &inner.matrix_ids[idx];
            let Some(entry) = inner.entries.get(id) else {
                continue;
            };
            let adjusted = sim * entry.confidence();
            if best.map(|(best_score, _)| adjusted > best_score).unwrap_or(true) {
                best = Some((adjusted, idx));
            }
        }

        best.and_then(|(score, idx)| {
            if score >= min_score {
                let id = &inner.matrix_ids[idx];
                inner.entries.get(id).cloned()
            } else {
                None
            }
        })
    }

    /// Non-expired entries at or below `max_hops`, for inclusion in an
    /// outgoing announcement.
    pub fn export_for_gossip(&self, max_hops: u32) -> Vec<GradientEntry> {
        let now = now_unix();
        let inner = self.inner.read();
        let ttl = inner.ttl_secs as i64;
        inner
            .entries
            .values()
            .filter(|entry| entry.hops <= max_hops && now - entry.last_updated <= ttl)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> GradientStats {
        let inner = self.inner.read();
        GradientStats {
            entry_count: inner.entries.len(),
            capacity: inner.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_worst(inner: &mut Inner) {
    let now = now_unix();
    let worst = inner
        .entries
        .iter()
        .min_by(|(_, a), (_, b)| {
            let score_a = a.confidence() / (1.0 + (now - a.last_updated).max(0) as f32 / 60.0);
            let score_b = b.confidence() / (1.0 + (now - b.last_updated).max(0) as f32 / 60.0);
            score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(id, _)| id.clone());

    if let Some(id) = worst {
        inner.entries.remove(&id);
    }
}

fn rebuild_matrix(inner: &mut Inner) {
    inner.matrix.clear();
    inner.matrix_ids.clear();
    for (id, entry) in inner.entries.iter() {
        inner.matrix_ids.push(id.clone());
        inner.matrix.push(entry.embedding.clone());
    }
    inner.dirty = false;
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_a() -> Vec<f32> {
        let mut v = vec![1.0, 0.0, 0.0];
        crate::embedding::l2_normalize(&mut v);
        v
    }

    #[test]
    fn fewer_hops_replaces_existing_entry() {
        let table = GradientTable::new(10, 300);
        table.update("cap1", "vision", vec_a(), 3, "peerA", "peerA", None);
        table.update("cap1", "vision", vec_a(), 1, "peerB", "peerB", None);
        let entry = table.find_best_route(&vec_a(), 0.0).unwrap();
        assert_eq!(entry.hops, 1);
        assert_eq!(entry.next_hop, "peerB");
    }

    #[test]
    fn worse_hops_do_not_replace_existing_entry() {
        let table = GradientTable::new(10, 300);
        table.update("cap1", "vision", vec_a(), 1, "peerB", "peerB", None);
        table.update("cap1", "vision", vec_a(), 3, "peerC", "peerC", None);
        let entry = table.find_best_route(&vec_a(), 0.0).unwrap();
        assert_eq!(entry.hops, 1);
    }

    #[test]
    fn invalidate_node_removes_only_matching_next_hop() {
        let table = GradientTable::new(10, 300);
        table.update("cap1", "vision", vec_a(), 1, "peerA", "peerA", None);
        table.update("cap2", "llm", vec_a(), 1, "peerB", "peerB", None);
        let removed = table.invalidate_node("peerA");
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_best_route_respects_min_score() {
        let table = GradientTable::new(10, 300);
        table.update("cap1", "vision", vec_a(), 1, "peerA", "peerA", None);
        assert!(table.find_best_route(&vec_a(), 0.99).is_some());

        let mut orthogonal = vec![0.0, 1.0, 0.0];
        crate::embedding::l2_normalize(&mut orthogonal);
        assert!(table.find_best_route(&orthogonal, 0.5).is_none());
    }

    #[test]
    fn export_for_gossip_respects_hop_cap() {
        let table = GradientTable::new(10, 300);
        table.update("cap1", "vision", vec_a(), 2, "peerA", "peerA", None);
        table.update("cap2", "llm", vec_a(), 6, "peerB", "peerB", None);
        let exported = table.export_for_gossip(5);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].capability_id, "cap1");
    }
}
