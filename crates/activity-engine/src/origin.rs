//! Tracking of engine-issued contexts
//!
//! Every service call the engine emits carries a fresh context. When the
//! host reports the resulting state change, the recorder asks this tracker
//! whether the change came from the engine and should not be learned from.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use zone_core::Context;

/// How long an issued context is remembered
pub const DEFAULT_ORIGIN_TTL: Duration = Duration::from_secs(300);

/// Registry of contexts the engine issued
#[derive(Debug)]
pub struct OriginTracker {
    issued: DashMap<String, Instant>,
    ttl: Duration,
}

impl Default for OriginTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN_TTL)
    }
}

impl OriginTracker {
    #[must_use] pub fn new(ttl: Duration) -> Self {
        Self {
            issued: DashMap::new(),
            ttl,
        }
    }

    /// Issue and remember a fresh context
    #[must_use] pub fn issue(&self) -> Context {
        self.prune();
        let context = Context::new();
        self.issued.insert(context.id.clone(), Instant::now());
        context
    }

    /// Whether a context (or its parent) was issued by the engine
    #[must_use] pub fn is_own(&self, context: &Context) -> bool {
        self.is_live(&context.id)
            || context
                .parent_id
                .as_deref()
                .is_some_and(|parent| self.is_live(parent))
    }

    /// Number of remembered contexts
    #[must_use] pub fn len(&self) -> usize {
        self.issued.len()
    }

    #[must_use] pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }

    fn is_live(&self, id: &str) -> bool {
        self.issued
            .get(id)
            .is_some_and(|issued_at| issued_at.elapsed() < self.ttl)
    }

    fn prune(&self) {
        let ttl = self.ttl;
        self.issued.retain(|_, issued_at| issued_at.elapsed() < ttl);
    }
}
