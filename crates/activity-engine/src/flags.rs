//! Per-zone feature flags
//!
//! Every rule declares the feature categories it belongs to; the engine
//! consults this table at evaluation time. Zones that were never configured
//! read the documented defaults.

use crate::error::EngineError;
use crate::model::{Feature, FeatureFlagSet};
use zone_core::persistence;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// A flag write that changed a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub zone_id: String,
    pub feature: Feature,
    pub enabled: bool,
    /// External entity name of the flag (`<zone>_<feature>`)
    pub entity_name: String,
}

/// Flag check counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FlagMetrics {
    pub total: u64,
    pub enabled: u64,
    pub disabled: u64,
}

/// Feature flag table keyed by zone
pub struct FeatureFlagManager {
    flags: DashMap<String, FeatureFlagSet>,
    event_tx: broadcast::Sender<FlagChange>,
    checks_total: AtomicU64,
    checks_enabled: AtomicU64,
    checks_disabled: AtomicU64,
    data_path: Option<PathBuf>,
}

impl Default for FeatureFlagManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureFlagManager {
    /// Create an empty in-memory table
    #[must_use] pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            flags: DashMap::new(),
            event_tx,
            checks_total: AtomicU64::new(0),
            checks_enabled: AtomicU64::new(0),
            checks_disabled: AtomicU64::new(0),
            data_path: None,
        }
    }

    /// Create a table backed by `feature_flags.json` in `data_dir`
    pub async fn load(data_dir: &Path) -> Self {
        let data_path = data_dir.join("feature_flags.json");
        let mut manager = Self::new();

        let stored: BTreeMap<String, FeatureFlagSet> =
            persistence::load_json(&data_path, "feature flags").await;
        for (zone_id, set) in stored {
            manager.flags.insert(zone_id, set);
        }

        manager.data_path = Some(data_path);
        manager
    }

    /// Persist the table, if it was loaded from disk
    pub async fn save(&self) -> Result<(), EngineError> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        persistence::save_json(path, &self.all(), "feature flags").await?;
        Ok(())
    }

    /// Subscribe to flag changes
    #[must_use] pub fn subscribe(&self) -> broadcast::Receiver<FlagChange> {
        self.event_tx.subscribe()
    }

    /// Check a flag; unconfigured zones read the defaults
    #[must_use] pub fn is_enabled(&self, zone_id: &str, feature: Feature) -> bool {
        let enabled = self
            .flags
            .get(zone_id)
            .map_or_else(|| feature.default_enabled(), |set| set.get(feature));

        self.checks_total.fetch_add(1, Ordering::Relaxed);
        if enabled {
            self.checks_enabled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checks_disabled.fetch_add(1, Ordering::Relaxed);
        }
        enabled
    }

    /// Write a flag; returns whether the value changed
    pub fn set(&self, zone_id: &str, feature: Feature, enabled: bool) -> bool {
        let changed = {
            let mut set = self.flags.entry(zone_id.to_string()).or_default();
            let changed = set.get(feature) != enabled;
            set.set(feature, enabled);
            changed
        };

        if changed {
            tracing::info!(
                "Feature {} {} for zone {}",
                feature,
                if enabled { "enabled" } else { "disabled" },
                zone_id
            );
            let _ = self.event_tx.send(FlagChange {
                zone_id: zone_id.to_string(),
                feature,
                enabled,
                entity_name: entity_name(zone_id, feature),
            });
        }
        changed
    }

    /// All five flags of a zone
    #[must_use] pub fn flags(&self, zone_id: &str) -> FeatureFlagSet {
        self.flags
            .get(zone_id)
            .map(|set| *set.value())
            .unwrap_or_default()
    }

    /// Every configured zone, ordered by zone id
    #[must_use] pub fn all(&self) -> BTreeMap<String, FeatureFlagSet> {
        self.flags
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }

    /// Check counters
    #[must_use] pub fn metrics(&self) -> FlagMetrics {
        FlagMetrics {
            total: self.checks_total.load(Ordering::Relaxed),
            enabled: self.checks_enabled.load(Ordering::Relaxed),
            disabled: self.checks_disabled.load(Ordering::Relaxed),
        }
    }
}

/// External entity name of a zone flag
#[must_use] pub fn entity_name(zone_id: &str, feature: Feature) -> String {
    format!("{}_{}", zone_id, feature.as_str())
}

/// Split an external flag entity name back into zone and feature
///
/// Zone ids may contain underscores, so the feature is matched as a suffix.
#[must_use] pub fn parse_entity_name(name: &str) -> Option<(String, Feature)> {
    Feature::ALL.into_iter().find_map(|feature| {
        let zone = name.strip_suffix(feature.as_str())?.strip_suffix('_')?;
        (!zone.is_empty()).then(|| (zone.to_string(), feature))
    })
}
