//! Typed errors at the core's external boundaries. Internal fallible
//! functions use `anyhow::Result`; these enums are what callers outside
//! the crate actually match on.

use std::fmt;

/// No capability cleared the minimum route threshold. Non-fatal — the
/// caller may widen the query, retry later, or surface it to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingError {
    pub intent: String,
    pub best_score: f32,
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no match for intent {:?} (best score {:.3})",
            self.intent, self.best_score
        )
    }
}

impl std::error::Error for RoutingError {}

/// Send failed on a specific transport. Never surfaced to the router —
/// the transport manager retries on the next-best connected transport.
/// Only a total failure across every transport escalates further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub peer_id: String,
    pub transport: String,
    pub reason: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "send to {} via {} failed: {}",
            self.peer_id, self.transport, self.reason
        )
    }
}

impl std::error::Error for TransportError {}

/// An inbound gossip envelope was rejected: bad nonce, clock skew, or a
/// malformed capability. Logged at warn and dropped, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipReject {
    ClockSkew { delta_secs: i64 },
    ReplayedNonce(String),
    MalformedCapability(String),
}

impl fmt::Display for GossipReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GossipReject::ClockSkew { delta_secs } => {
                write!(f, "envelope clock skew of {delta_secs}s exceeds tolerance")
            }
            GossipReject::ReplayedNonce(nonce) => write!(f, "nonce {nonce} already seen"),
            GossipReject::MalformedCapability(reason) => {
                write!(f, "malformed capability: {reason}")
            }
        }
    }
}

impl std::error::Error for GossipReject {}

/// A bounded resource hit its cap: gradient table full, embedding cache
/// eviction, announcement too large. Internal and self-healing — callers
/// outside the affected component don't normally see this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceExhausted {
    GradientTableFull,
    EmbeddingCacheFull,
    AnnouncementTooLarge,
}

impl fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceExhausted::GradientTableFull => write!(f, "gradient table at capacity"),
            ResourceExhausted::EmbeddingCacheFull => write!(f, "embedding cache at capacity"),
            ResourceExhausted::AnnouncementTooLarge => {
                write!(f, "announcement exceeds capability cap")
            }
        }
    }
}

impl std::error::Error for ResourceExhausted {}

/// An RPC response future didn't resolve within its bound. The pending
/// slot is removed so a late reply is dropped rather than misdelivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutError {
    pub request_id: String,
    pub waited_secs: u64,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request {} timed out after {}s",
            self.request_id, self.waited_secs
        )
    }
}

impl std::error::Error for TimeoutError {}
