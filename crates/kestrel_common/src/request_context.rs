//! Per-request context carried through route → rewrite → execute → merge.
//!
//! Fields:
//! - `request_id`: unique per statement execution (monotonic)
//! - `session_id`: unique per client session
//! - `hints`: forced sharding values scoped to this request only

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::hint::HintOverrides;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide, strictly increasing.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: u64,
    pub session_id: u64,
    pub hints: Option<HintOverrides>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(session_id: u64) -> Self {
        Self {
            request_id: next_request_id(),
            session_id,
            hints: None,
            started_at: Instant::now(),
        }
    }

    /// Attach hint overrides. They end with this context.
    pub fn with_hints(mut self, hints: HintOverrides) -> Self {
        self.hints = if hints.is_empty() { None } else { Some(hints) };
        self
    }

    pub fn hints(&self) -> Option<&HintOverrides> {
        self.hints.as_ref()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.started_at.elapsed().as_micros() as u64
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(0)
    }
}
