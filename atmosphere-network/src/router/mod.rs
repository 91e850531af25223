//! Semantic router (C5): decides, per intent, between handling locally
//! and forwarding to the nearest better provider. Also hosts the fast
//! project router and the trigger/intent dispatcher, which share the
//! same embedding engine.

pub mod fast_project;
pub mod trigger;

pub use fast_project::{FastProjectRouter, ProjectMetadata, ProjectRouteResult};
pub use trigger::{DispatchedIntent, ThrottleTracker, TriggerDefinition, TriggerRouter};

use crate::embedding::{cos, EmbeddingEngine};
use crate::gradient::GradientTable;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A locally advertised function: stable ID `node_id:label`.
#[derive(Debug, Clone)]
pub struct Capability {
    pub id: String,
    pub label: String,
    pub description: String,
    pub embedding: Vec<f32>,
    pub handler: String,
    pub models: Vec<String>,
    pub constraints: serde_json::Value,
}

/// What `route()` decided to do with an intent.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteAction {
    ProcessLocal,
    Forward,
    NoMatch,
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub action: RouteAction,
    pub capability: Option<String>,
    pub score: f32,
    pub adjusted_score: f32,
    pub hops: u32,
    pub next_hop: Option<String>,
    pub via_node: Option<String>,
    pub reason: String,
}

/// One candidate considered by `rank_capabilities`.
#[derive(Debug, Clone)]
pub struct RankedCapability {
    pub capability_id: String,
    pub label: String,
    pub score: f32,
}

/// Registers local capabilities and routes intents between local
/// execution and the nearest better remote provider.
pub struct CapabilityRouter {
    node_id: String,
    embedding: std::sync::Arc<EmbeddingEngine>,
    capabilities: RwLock<HashMap<String, Capability>>,
    match_threshold: f32,
    min_route_threshold: f32,
}

impl CapabilityRouter {
    pub fn new(
        node_id: impl Into<String>,
        embedding: std::sync::Arc<EmbeddingEngine>,
        match_threshold: f32,
        min_route_threshold: f32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            embedding,
            capabilities: RwLock::new(HashMap::new()),
            match_threshold,
            min_route_threshold,
        }
    }

    /// Register a capability, embedding its description once, and emit
    /// a gradient-table self-entry at hops=0 so this node's own
    /// capabilities are found by `route()` the same way a peer's
    /// gossiped ones are. Returns the stable capability ID
    /// (`node_id:label`).
    pub fn register_capability(
        &self,
        label: &str,
        description: &str,
        handler: &str,
        models: Vec<String>,
        constraints: Option<serde_json::Value>,
        gradient: &GradientTable,
    ) -> anyhow::Result<String> {
        let embedding = self.embedding.embed(description, true)?;
        let id = format!("{}:{}", self.node_id, label);
        self.capabilities.write().insert(
            id.clone(),
            Capability {
                id: id.clone(),
                label: label.to_string(),
                description: description.to_string(),
                embedding: embedding.clone(),
                handler: handler.to_string(),
                models,
                constraints: constraints.unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            },
        );
        gradient.update(&id, label, embedding, 0, &self.node_id, &self.node_id, None);
        Ok(id)
    }

    pub fn unregister_capability(&self, label: &str) {
        let id = format!("{}:{}", self.node_id, label);
        self.capabilities.write().remove(&id);
    }

    /// Route an intent: embed, check local match, check remote match via
    /// the gradient table, then pick the winner (local vs. forward vs.
    /// no match), preferring fallback local processing over dropping an
    /// intent entirely when something scored above the route floor.
    pub fn route(&self, intent_text: &str, gradient: &GradientTable) -> anyhow::Result<RouteResult> {
        let intent_vec = self.embedding.embed(intent_text, true)?;

        let local_best = self.best_local_match(&intent_vec);
        let remote_best = gradient.find_best_route(&intent_vec, self.min_route_threshold);

        let local_score = local_best.as_ref().map(|(_, score)| *score).unwrap_or(0.0);
        let remote_adjusted = remote_best
            .as_ref()
            .map(|entry| cos(&intent_vec, &entry.embedding) * entry.confidence())
            .unwrap_or(0.0);

        if local_score >= self.match_threshold && local_score >= remote_adjusted {
            let (capability, score) = local_best.unwrap();
            return Ok(RouteResult {
                action: RouteAction::ProcessLocal,
                capability: Some(capability.id),
                score,
                adjusted_score: score,
                hops: 0,
                next_hop: None,
                via_node: None,
                reason: "local match above threshold".to_string(),
            });
        }

        if let Some(entry) = &remote_best {
            if remote_adjusted > local_score {
                return Ok(RouteResult {
                    action: RouteAction::Forward,
                    capability: Some(entry.capability_id.clone()),
                    score: cos(&intent_vec, &entry.embedding),
                    adjusted_score: remote_adjusted,
                    hops: entry.hops,
                    next_hop: Some(entry.next_hop.clone()),
                    via_node: Some(entry.via.clone()),
                    reason: "remote route exceeds local score".to_string(),
                });
            }
        }

        if local_score >= self.min_route_threshold {
            let (capability, score) = local_best.unwrap();
            return Ok(RouteResult {
                action: RouteAction::ProcessLocal,
                capability: Some(capability.id),
                score,
                adjusted_score: score,
                hops: 0,
                next_hop: None,
                via_node: None,
                reason: "below match threshold, processed locally as fallback".to_string(),
            });
        }

        Ok(RouteResult {
            action: RouteAction::NoMatch,
            capability: None,
            score: local_score.max(remote_adjusted),
            adjusted_score: local_score.max(remote_adjusted),
            hops: 0,
            next_hop: None,
            via_node: None,
            reason: "no candidate met the route threshold".to_string(),
        })
    }

    fn best_local_match(&self, intent_vec: &[f32]) -> Option<(Capability, f32)> {
        let capabilities = self.capabilities.read();
        capabilities
            .values()
            .map(|capability| (capability.clone(), cos(intent_vec, &capability.embedding)))
            .max_by(|(a_cap, a_score), (b_cap, b_score)| {
                a_score
                    .partial_cmp(b_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a_cap.id.cmp(&b_cap.id).reverse())
            })
    }

    /// Same scoring as `route()`, exposed for diagnostics/UI without
    /// committing to a route decision.
    pub fn rank_capabilities(&self, intent_text: &str, top_k: usize) -> anyhow::Result<Vec<RankedCapability>> {
        let intent_vec = self.embedding.embed(intent_text, true)?;
        let capabilities = self.capabilities.read();
        let mut ranked: Vec<RankedCapability> = capabilities
            .values()
            .map(|capability| RankedCapability {
                capability_id: capability.id.clone(),
                label: capability.label.clone(),
                score: cos(&intent_vec, &capability.embedding),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// The raw local index, exposed for the fast project router's
    /// keyword-boost path and for tests.
    pub fn get_local_capability_vectors(&self) -> HashMap<String, Vec<f32>> {
        self.capabilities
            .read()
            .values()
            .map(|capability| (capability.id.clone(), capability.embedding.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingBackend;
    use std::sync::Arc;

    fn engine() -> Arc<EmbeddingEngine> {
        Arc::new(EmbeddingEngine::new(Arc::new(HashEmbeddingBackend), 64, 100))
    }

    #[test]
    fn local_match_above_threshold_never_forwards() {
        let router = CapabilityRouter::new("nodeA", engine(), 0.0, 0.0);
        let gradient = GradientTable::new(1000, 300);
        router
            .register_capability("vision", "image analysis and photo description", "vision-handler", vec![], None, &gradient)
            .unwrap();

        let result = router.route("describe this photo", &gradient).unwrap();
        assert_eq!(result.action, RouteAction::ProcessLocal);
    }

    #[test]
    fn no_match_below_every_threshold() {
        let router = CapabilityRouter::new("nodeA", engine(), 0.99, 0.99);
        let gradient = GradientTable::new(1000, 300);
        router
            .register_capability("vision", "image analysis", "vision-handler", vec![], None, &gradient)
            .unwrap();

        let result = router.route("completely unrelated gibberish text", &gradient).unwrap();
        assert_eq!(result.action, RouteAction::NoMatch);
    }

    #[test]
    fn routing_is_deterministic() {
        let router = CapabilityRouter::new("nodeA", engine(), 0.5, 0.3);
        let gradient = GradientTable::new(1000, 300);
        router
            .register_capability("vision", "image analysis", "vision-handler", vec![], None, &gradient)
            .unwrap();

        let a = router.route("describe this photo", &gradient).unwrap();
        let b = router.route("describe this photo", &gradient).unwrap();
        assert_eq!(a.action, b.action);
        assert_eq!(a.capability, b.capability);
    }

    #[test]
    fn registering_a_capability_emits_a_self_entry_in_the_gradient_table() {
        let router = CapabilityRouter::new("nodeA", engine(), 0.5, 0.3);
        let gradient = GradientTable::new(1000, 300);
        let id = router
            .register_capability("vision", "image analysis", "vision-handler", vec![], None, &gradient)
            .unwrap();

        let entry = gradient.find_best_route(&router.get_local_capability_vectors()[&id], 0.0).unwrap();
        assert_eq!(entry.hops, 0);
        assert_eq!(entry.next_hop, "nodeA");
    }
}
