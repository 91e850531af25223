//! Trigger/intent dispatch: capabilities push events that become routed
//! intents. Handler resolution is strictly ordered and multi-delivery —
//! handlers must be idempotent under duplicate delivery.

use super::{CapabilityRouter, RouteAction};
use crate::gradient::GradientTable;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

/// A trigger definition: an event name, an intent template, an optional
/// routing hint, a priority, and a throttle window.
#[derive(Debug, Clone)]
pub struct TriggerDefinition {
    pub capability_id: String,
    pub event: String,
    pub intent_template: String,
    pub route_hint: Option<String>,
    pub priority: i32,
    pub throttle: Duration,
}

/// A built intent ready for dispatch.
#[derive(Debug, Clone)]
pub struct DispatchedIntent {
    pub text: String,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub matched_handlers: Vec<String>,
}

/// Wraps a fired intent for the priority queue: higher `priority` values
/// pop first.
struct QueuedIntent(DispatchedIntent);

impl PartialEq for QueuedIntent {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority
    }
}

impl Eq for QueuedIntent {}

impl PartialOrd for QueuedIntent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedIntent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.priority.cmp(&other.0.priority)
    }
}

/// Owns the `(capability_id, event) -> last_fired_at` map and sweeps
/// entries older than the longest configured throttle window so it does
/// not grow unbounded across a long-running node.
pub struct ThrottleTracker {
    last_fired: Mutex<HashMap<(String, String), Instant>>,
    longest_window: Mutex<Duration>,
}

impl Default for ThrottleTracker {
    fn default() -> Self {
        Self {
            last_fired: Mutex::new(HashMap::new()),
            longest_window: Mutex::new(Duration::from_secs(30)),
        }
    }
}

impl ThrottleTracker {
    /// Returns `true` if the `(capability_id, event)` pair is allowed to
    /// fire now, recording the firing time as a side effect.
    pub fn try_fire(&self, capability_id: &str, event: &str, window: Duration) -> bool {
        let key = (capability_id.to_string(), event.to_string());
        let now = Instant::now();

        {
            let mut longest = self.longest_window.lock();
            if window > *longest {
                *longest = window;
            }
        }

        let mut last_fired = self.last_fired.lock();
        match last_fired.get(&key) {
            Some(last) if now.duration_since(*last) < window => false,
            _ => {
                last_fired.insert(key, now);
                true
            }
        }
    }

    pub fn sweep(&self) {
        let longest = *self.longest_window.lock();
        let now = Instant::now();
        self.last_fired
            .lock()
            .retain(|_, last| now.duration_since(*last) < longest);
    }

    pub fn len(&self) -> usize {
        self.last_fired.lock().len()
    }
}

type GlobalHandler = Box<dyn Fn(&DispatchedIntent) + Send + Sync>;
type PatternHandler = (String, Box<dyn Fn(&DispatchedIntent) + Send + Sync>);

/// Resolves triggers to handlers in the order: exact hint
/// (`capability:<id>`) → type glob (`agent/*`) → semantic router →
/// pattern-subscribed handlers → global handlers.
pub struct TriggerRouter {
    definitions: RwLock<HashMap<(String, String), TriggerDefinition>>,
    throttle: ThrottleTracker,
    exact_handlers: RwLock<HashMap<String, String>>,
    glob_handlers: RwLock<Vec<(String, String)>>,
    pattern_handlers: Mutex<Vec<PatternHandler>>,
    global_handlers: Mutex<Vec<GlobalHandler>>,
    queue: Mutex<BinaryHeap<QueuedIntent>>,
}

impl Default for TriggerRouter {
    fn default() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            throttle: ThrottleTracker::default(),
            exact_handlers: RwLock::new(HashMap::new()),
            glob_handlers: RwLock::new(Vec::new()),
            pattern_handlers: Mutex::new(Vec::new()),
            global_handlers: Mutex::new(Vec::new()),
            queue: Mutex::new(BinaryHeap::new()),
        }
    }
}

impl TriggerRouter {
    pub fn register_trigger(&self, definition: TriggerDefinition) {
        let key = (definition.capability_id.clone(), definition.event.clone());
        self.definitions.write().insert(key, definition);
    }

    pub fn register_exact_handler(&self, hint: impl Into<String>, handler_name: impl Into<String>) {
        self.exact_handlers.write().insert(hint.into(), handler_name.into());
    }

    pub fn register_glob_handler(&self, glob: impl Into<String>, handler_name: impl Into<String>) {
        self.glob_handlers.write().push((glob.into(), handler_name.into()));
    }

    pub fn register_pattern_handler(&self, pattern: impl Into<String>, handler: Box<dyn Fn(&DispatchedIntent) + Send + Sync>) {
        self.pattern_handlers.lock().push((pattern.into(), handler));
    }

    pub fn register_global_handler(&self, handler: Box<dyn Fn(&DispatchedIntent) + Send + Sync>) {
        self.global_handlers.lock().push(handler);
    }

    /// Fire a trigger: throttle, build the intent, resolve handlers in
    /// order (exact hint → type glob → semantic router → pattern
    /// handlers → global handlers), dispatch to every match, and enqueue
    /// the intent for async processing. Exactly-once delivery is not
    /// guaranteed.
    pub fn fire(
        &self,
        capability_id: &str,
        event: &str,
        payload: serde_json::Value,
        router: &CapabilityRouter,
        gradient: &GradientTable,
    ) -> Option<DispatchedIntent> {
        let key = (capability_id.to_string(), event.to_string());
        let definition = self.definitions.read().get(&key)?.clone();

        if !self.throttle.try_fire(capability_id, event, definition.throttle) {
            return None;
        }

        let text = render_template(&definition.intent_template, &payload);
        let mut matched_handlers = Vec::new();

        if let Some(hint) = &definition.route_hint {
            if let Some(handler) = self.exact_handlers.read().get(hint) {
                matched_handlers.push(handler.clone());
            } else if let Some(handler) = self.match_glob(hint) {
                matched_handlers.push(handler);
            } else if let Ok(result) = router.route(hint, gradient) {
                if result.action != RouteAction::NoMatch {
                    if let Some(capability) = result.capability {
                        matched_handlers.push(format!("semantic:{capability}"));
                    }
                }
            }
        }

        let intent = DispatchedIntent {
            text,
            priority: definition.priority,
            payload,
            matched_handlers: matched_handlers.clone(),
        };

        for (pattern, handler) in self.pattern_handlers.lock().iter() {
            if definition.route_hint.as_deref().map(|hint| glob_matches(pattern, hint)).unwrap_or(false) {
                handler(&intent);
            }
        }
        for handler in self.global_handlers.lock().iter() {
            handler(&intent);
        }

        self.queue.lock().push(QueuedIntent(intent.clone()));
        Some(intent)
    }

    /// Pop the highest-priority queued intent for async processing.
    pub fn pop_queued(&self) -> Option<DispatchedIntent> {
        self.queue.lock().pop().map(|queued| queued.0)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    fn match_glob(&self, hint: &str) -> Option<String> {
        self.glob_handlers
            .read()
            .iter()
            .find(|(glob, _)| glob_matches(glob, hint))
            .map(|(_, handler)| handler.clone())
    }

    pub fn sweep_throttles(&self) {
        self.throttle.sweep();
    }
}

fn render_template(template: &str, payload: &serde_json::Value) -> String {
    let mut rendered = template.to_string();
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            let placeholder = format!("{{{key}}}");
            let value_str = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &value_str);
        }
    }
    rendered
}

fn glob_matches(glob: &str, candidate: &str) -> bool {
    match glob.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => glob == candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingEngine, HashEmbeddingBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn capability_router(node_id: &str, match_threshold: f32, min_route_threshold: f32) -> CapabilityRouter {
        let engine = Arc::new(EmbeddingEngine::new(Arc::new(HashEmbeddingBackend), 64, 100));
        CapabilityRouter::new(node_id, engine, match_threshold, min_route_threshold)
    }

    #[test]
    fn throttle_drops_repeated_fires_within_window() {
        let tracker = ThrottleTracker::default();
        assert!(tracker.try_fire("cap1", "motion", Duration::from_secs(30)));
        assert!(!tracker.try_fire("cap1", "motion", Duration::from_secs(30)));
    }

    #[test]
    fn exact_hint_resolves_before_glob() {
        let trigger_router = TriggerRouter::default();
        trigger_router.register_trigger(TriggerDefinition {
            capability_id: "cam1".to_string(),
            event: "motion".to_string(),
            intent_template: "motion detected: {zone}".to_string(),
            route_hint: Some("capability:cam1".to_string()),
            priority: 5,
            throttle: Duration::from_millis(1),
        });
        trigger_router.register_exact_handler("capability:cam1", "exact-handler");
        trigger_router.register_glob_handler("capability:*", "glob-handler");

        let capability_router = capability_router("nodeA", 0.5, 0.3);
        let gradient = GradientTable::new(1000, 300);

        let mut payload = serde_json::Map::new();
        payload.insert("zone".to_string(), serde_json::Value::String("porch".to_string()));
        let intent = trigger_router
            .fire("cam1", "motion", serde_json::Value::Object(payload), &capability_router, &gradient)
            .unwrap();

        assert_eq!(intent.text, "motion detected: porch");
        assert_eq!(intent.matched_handlers, vec!["exact-handler".to_string()]);
    }

    #[test]
    fn pattern_and_global_handlers_both_receive_dispatch() {
        let trigger_router = TriggerRouter::default();
        trigger_router.register_trigger(TriggerDefinition {
            capability_id: "agent1".to_string(),
            event: "spawned".to_string(),
            intent_template: "agent spawned".to_string(),
            route_hint: Some("agent/worker".to_string()),
            priority: 1,
            throttle: Duration::from_millis(1),
        });

        let pattern_calls = Arc::new(AtomicUsize::new(0));
        let pattern_calls_clone = pattern_calls.clone();
        trigger_router.register_pattern_handler(
            "agent/*",
            Box::new(move |_| {
                pattern_calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let global_calls = Arc::new(AtomicUsize::new(0));
        let global_calls_clone = global_calls.clone();
        trigger_router.register_global_handler(Box::new(move |_| {
            global_calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let capability_router = capability_router("nodeA", 0.5, 0.3);
        let gradient = GradientTable::new(1000, 300);
        trigger_router.fire("agent1", "spawned", serde_json::Value::Null, &capability_router, &gradient);
        assert_eq!(pattern_calls.load(Ordering::SeqCst), 1);
        assert_eq!(global_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn semantic_router_resolves_when_no_exact_or_glob_handler_matches() {
        let trigger_router = TriggerRouter::default();
        trigger_router.register_trigger(TriggerDefinition {
            capability_id: "cam1".to_string(),
            event: "motion".to_string(),
            intent_template: "describe this photo".to_string(),
            route_hint: Some("describe this photo".to_string()),
            priority: 5,
            throttle: Duration::from_millis(1),
        });

        let capability_router = capability_router("nodeA", 0.0, 0.0);
        let gradient = GradientTable::new(1000, 300);
        capability_router
            .register_capability("vision", "image analysis and photo description", "vision-handler", vec![], None, &gradient)
            .unwrap();

        let intent = trigger_router
            .fire("cam1", "motion", serde_json::Value::Null, &capability_router, &gradient)
            .unwrap();

        assert_eq!(intent.matched_handlers.len(), 1);
        assert!(intent.matched_handlers[0].starts_with("semantic:"));
    }

    #[test]
    fn fired_intents_are_queued_in_priority_order() {
        let trigger_router = TriggerRouter::default();
        trigger_router.register_trigger(TriggerDefinition {
            capability_id: "cap-low".to_string(),
            event: "event".to_string(),
            intent_template: "low".to_string(),
            route_hint: None,
            priority: 1,
            throttle: Duration::from_millis(1),
        });
        trigger_router.register_trigger(TriggerDefinition {
            capability_id: "cap-high".to_string(),
            event: "event".to_string(),
            intent_template: "high".to_string(),
            route_hint: None,
            priority: 9,
            throttle: Duration::from_millis(1),
        });

        let capability_router = capability_router("nodeA", 0.5, 0.3);
        let gradient = GradientTable::new(1000, 300);
        trigger_router.fire("cap-low", "event", serde_json::Value::Null, &capability_router, &gradient);
        trigger_router.fire("cap-high", "event", serde_json::Value::Null, &capability_router, &gradient);

        assert_eq!(trigger_router.queue_len(), 2);
        assert_eq!(trigger_router.pop_queued().unwrap().text, "high");
        assert_eq!(trigger_router.pop_queued().unwrap().text, "low");
        assert!(trigger_router.pop_queued().is_none());
    }
}
