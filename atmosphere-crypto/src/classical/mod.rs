//! Classical (non-post-quantum) signature primitives.

pub mod ed25519;

pub use ed25519::*;
