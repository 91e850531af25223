//! Fast project router: pre-computed matrix matching for domains with
//! thousands of specialized "projects" addressed by `namespace/name`.

use crate::embedding::{cos, EmbeddingEngine};
use std::collections::HashMap;
use std::sync::Arc;

/// A project's static metadata, embedded once at load time.
#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    pub namespace: String,
    pub name: String,
    pub domain: String,
    pub topics: Vec<String>,
    pub description: String,
    pub capability_tags: Vec<String>,
    pub models: Vec<String>,
    pub hosting_nodes: Vec<String>,
}

impl ProjectMetadata {
    pub fn path(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn embedding_text(&self) -> String {
        format!("{} {} {} {}", self.domain, self.topics.join(" "), self.description, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectRouteResult {
    pub project_path: String,
    pub score: f32,
    pub fallback: bool,
}

/// Small, static domain→keyword map used for an integer-weighted boost
/// during semantic routing. Deliberately tiny: a real deployment feeds
/// this from project metadata, not a hand-maintained global dictionary.
fn domain_keywords() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("animals/camelids", &["llama", "alpaca", "vicuna", "fiber"]),
        ("language/model", &["chat", "summarize", "write", "translate"]),
        ("vision/analysis", &["photo", "image", "picture", "describe"]),
    ]
}

pub struct FastProjectRouter {
    projects: Vec<ProjectMetadata>,
    matrix: Vec<Vec<f32>>,
    by_path: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_domain: HashMap<String, Vec<usize>>,
    by_topic: HashMap<String, Vec<usize>>,
    by_capability: HashMap<String, Vec<usize>>,
}

impl FastProjectRouter {
    /// Build the router from a project list, embedding each project's
    /// `{domain, topics, description, name}` concatenation once.
    pub fn build(projects: Vec<ProjectMetadata>, embedding: &EmbeddingEngine) -> anyhow::Result<Self> {
        let mut matrix = Vec::with_capacity(projects.len());
        let mut by_path = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_domain: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_topic: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_capability: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, project) in projects.iter().enumerate() {
            let vector = embedding.embed(&project.embedding_text(), true)?;
            matrix.push(vector);
            by_path.insert(project.path(), idx);
            by_name.entry(project.name.clone()).or_insert(idx);
            by_domain.entry(project.domain.clone()).or_default().push(idx);
            for topic in &project.topics {
                by_topic.entry(topic.clone()).or_default().push(idx);
            }
            for tag in &project.capability_tags {
                by_capability.entry(tag.clone()).or_default().push(idx);
            }
        }

        Ok(Self {
            projects,
            matrix,
            by_path,
            by_name,
            by_domain,
            by_topic,
            by_capability,
        })
    }

    pub fn by_domain(&self, domain: &str) -> Vec<&ProjectMetadata> {
        self.by_domain
            .get(domain)
            .map(|indices| indices.iter().map(|&i| &self.projects[i]).collect())
            .unwrap_or_default()
    }

    pub fn by_capability(&self, tag: &str) -> Vec<&ProjectMetadata> {
        self.by_capability
            .get(tag)
            .map(|indices| indices.iter().map(|&i| &self.projects[i]).collect())
            .unwrap_or_default()
    }

    /// Route an explicit `"namespace/name"` path in O(1).
    pub fn route_path(&self, path: &str) -> Option<ProjectRouteResult> {
        self.by_path.get(path).map(|_| ProjectRouteResult {
            project_path: path.to_string(),
            score: 1.0,
            fallback: false,
        })
    }

    /// Route a bare project name: the first match in table order.
    pub fn route_name(&self, name: &str) -> Option<ProjectRouteResult> {
        self.by_name.get(name).map(|&idx| ProjectRouteResult {
            project_path: self.projects[idx].path(),
            score: 1.0,
            fallback: false,
        })
    }

    /// Semantic routing: embed the prompt, score against the matrix,
    /// add a keyword boost per matching domain, pick the argmax.
    pub fn route_semantic(&self, prompt: &str, embedding: &EmbeddingEngine) -> anyhow::Result<Option<ProjectRouteResult>> {
        if self.projects.is_empty() {
            return Ok(None);
        }

        let query = embedding.embed(prompt, true)?;
        let lower_prompt = prompt.to_lowercase();

        let mut boosts: HashMap<&str, f32> = HashMap::new();
        for (domain, keywords) in domain_keywords() {
            let hits = keywords.iter().filter(|kw| lower_prompt.contains(*kw)).count();
            if hits > 0 {
                boosts.insert(domain, 0.1 * hits as f32);
            }
        }

        let mut best_idx = 0;
        let mut best_score = f32::MIN;
        for (idx, row) in self.matrix.iter().enumerate() {
            let mut score = cos(&query, row);
            if let Some(boost) = boosts.get(self.projects[idx].domain.as_str()) {
                score += boost;
            }
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        Ok(Some(ProjectRouteResult {
            project_path: self.projects[best_idx].path(),
            score: best_score,
            fallback: best_score < 0.3,
        }))
    }

    /// Unified dispatch entry point: `model` is an explicit
    /// `"namespace/name"` path, a bare project name, or `"auto"` /
    /// `"default"` / empty for semantic routing against the last user
    /// turn in `messages`.
    pub fn route(
        &self,
        model: &str,
        messages: &[serde_json::Value],
        embedding: &EmbeddingEngine,
    ) -> anyhow::Result<Option<ProjectRouteResult>> {
        let normalized = model.trim();
        if !normalized.is_empty() && !matches!(normalized, "auto" | "default") {
            if normalized.contains('/') {
                if let Some(result) = self.route_path(normalized) {
                    return Ok(Some(result));
                }
            } else if let Some(result) = self.route_name(normalized) {
                return Ok(Some(result));
            }
        }

        let Some(prompt) = last_user_turn(messages) else {
            return Ok(None);
        };
        self.route_semantic(&prompt, embedding)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Extracts the most recent `"role": "user"` message's text content, the
/// same turn a chat completion would treat as the live prompt.
fn last_user_turn(messages: &[serde_json::Value]) -> Option<String> {
    messages.iter().rev().find_map(|message| {
        let role = message.get("role").and_then(|r| r.as_str())?;
        if role != "user" {
            return None;
        }
        message.get("content").and_then(|c| c.as_str()).map(|s| s.to_string())
    })
}

/// Owns a rebuildable `FastProjectRouter` keyed to the project set that
/// produced it, so callers can cheaply check whether a reload is needed.
pub struct FastProjectRouterCache {
    router: parking_lot::RwLock<Option<Arc<FastProjectRouter>>>,
    known_paths: parking_lot::RwLock<Vec<String>>,
}

impl Default for FastProjectRouterCache {
    fn default() -> Self {
        Self {
            router: parking_lot::RwLock::new(None),
            known_paths: parking_lot::RwLock::new(Vec::new()),
        }
    }
}

impl FastProjectRouterCache {
    pub fn get_or_build(
        &self,
        projects: Vec<ProjectMetadata>,
        embedding: &EmbeddingEngine,
    ) -> anyhow::Result<Arc<FastProjectRouter>> {
        let mut paths: Vec<String> = projects.iter().map(ProjectMetadata::path).collect();
        paths.sort();

        if *self.known_paths.read() == paths {
            if let Some(router) = self.router.read().clone() {
                return Ok(router);
            }
        }

        let router = Arc::new(FastProjectRouter::build(projects, embedding)?);
        *self.router.write() = Some(router.clone());
        *self.known_paths.write() = paths;
        Ok(router)
    }
}
