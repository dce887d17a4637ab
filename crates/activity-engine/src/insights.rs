//! Zone insights with cache, generator and default fallback
//!
//! Lookups walk an ordered list of tiers and stop at the first hit. The
//! default tier always answers, so `get_insight` never fails.

use crate::collaborator::InsightGenerator;
use crate::error::EngineError;
use crate::model::{Insight, Provenance};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default cache lifetime of a generated insight
pub const DEFAULT_INSIGHT_TTL: Duration = Duration::from_secs(3600);
/// Default bound on a single generation
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Text served when nothing better is available
pub const DEFAULT_INSIGHT_TEXT: &str = "No insight available for this room yet.";

/// Lookup order
const TIERS: [Provenance; 3] = [Provenance::Cached, Provenance::Generated, Provenance::Default];

/// Result of asking one tier
enum Lookup {
    Found(String),
    NotFound,
}

struct CachedInsight {
    text: String,
    /// `None` when the TTL reaches past what the clock can represent
    expires_at: Option<Instant>,
}

impl CachedInsight {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub generated: u64,
    pub fallbacks: u64,
}

/// Zone insight provider
pub struct InsightsManager {
    cache: DashMap<String, CachedInsight>,
    generator: Option<Arc<dyn InsightGenerator>>,
    ttl: Duration,
    timeout: Duration,
    default_text: String,
    hits: AtomicU64,
    misses: AtomicU64,
    generated: AtomicU64,
    fallbacks: AtomicU64,
}

impl InsightsManager {
    pub fn new(generator: Option<Arc<dyn InsightGenerator>>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            generator,
            ttl,
            timeout,
            default_text: DEFAULT_INSIGHT_TEXT.to_string(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generated: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Replace the default text
    #[must_use] pub fn with_default_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    /// Insight for a zone; never fails
    pub async fn get_insight(&self, zone_id: &str) -> Insight {
        for provenance in TIERS {
            if let Lookup::Found(text) = self.lookup(provenance, zone_id).await {
                return Insight {
                    zone_id: zone_id.to_string(),
                    text,
                    provenance,
                };
            }
        }
        // The default tier always answers
        Insight {
            zone_id: zone_id.to_string(),
            text: self.default_text.clone(),
            provenance: Provenance::Default,
        }
    }

    async fn lookup(&self, provenance: Provenance, zone_id: &str) -> Lookup {
        match provenance {
            Provenance::Cached => self.cached(zone_id),
            Provenance::Generated => self.generate(zone_id).await,
            Provenance::Default => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                Lookup::Found(self.default_text.clone())
            }
        }
    }

    fn cached(&self, zone_id: &str) -> Lookup {
        let now = Instant::now();
        let hit = self
            .cache
            .get(zone_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.text.clone());

        match hit {
            Some(text) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Found(text)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.cache.remove_if(zone_id, |_, entry| !entry.is_live(now));
                Lookup::NotFound
            }
        }
    }

    async fn generate(&self, zone_id: &str) -> Lookup {
        let Some(generator) = &self.generator else {
            return Lookup::NotFound;
        };

        let result = match tokio::time::timeout(self.timeout, generator.generate(zone_id)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::GenerationTimeout(self.timeout)),
        };

        match result {
            Ok(text) => {
                self.generated.fetch_add(1, Ordering::Relaxed);
                self.cache.insert(
                    zone_id.to_string(),
                    CachedInsight {
                        text: text.clone(),
                        expires_at: Instant::now().checked_add(self.ttl),
                    },
                );
                tracing::debug!("Generated insight for zone {}", zone_id);
                Lookup::Found(text)
            }
            Err(e) => {
                tracing::warn!("Insight generation for zone {} failed: {}", zone_id, e);
                Lookup::NotFound
            }
        }
    }

    /// Drop a zone's cached insight
    pub fn invalidate(&self, zone_id: &str) {
        self.cache.remove(zone_id);
    }

    /// Drop every cached insight
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Cache counters
    #[must_use] pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}
