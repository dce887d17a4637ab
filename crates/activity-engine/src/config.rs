//! Engine configuration

use crate::evaluator::{DEFAULT_DARK_THRESHOLD_LUX, DEFAULT_SUN_ELEVATION_THRESHOLD};
use crate::recorder::DEFAULT_SYNC_BUFFER_CAPACITY;
use crate::rule_engine::DEFAULT_RULE_COOLDOWN_SECS;
use crate::tracker::DEFAULT_OCCUPATION_THRESHOLD_SECS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zone_core::PresenceWeights;

/// Tunables of the activity engine; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Continuous presence needed for `occupation`
    pub occupation_threshold_secs: u64,
    /// Presence score weights
    pub presence_weights: PresenceWeights,
    /// Illuminance below which a zone is dark
    pub dark_threshold_lux: f64,
    /// Sun elevation below which it is dark
    pub sun_elevation_threshold: f64,
    /// Minimum time between firings of a rule in one zone
    pub rule_cooldown_secs: u64,
    /// Lifetime of a cached insight
    pub insight_ttl_secs: u64,
    /// Bound on one insight generation
    pub generation_timeout_secs: u64,
    /// Light actions kept while sync is down
    pub sync_buffer_capacity: usize,
    /// Directory holding zones.json, feature_flags.json and rules.json
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            occupation_threshold_secs: DEFAULT_OCCUPATION_THRESHOLD_SECS,
            presence_weights: PresenceWeights::default(),
            dark_threshold_lux: DEFAULT_DARK_THRESHOLD_LUX,
            sun_elevation_threshold: DEFAULT_SUN_ELEVATION_THRESHOLD,
            rule_cooldown_secs: DEFAULT_RULE_COOLDOWN_SECS,
            insight_ttl_secs: 3600,
            generation_timeout_secs: 10,
            sync_buffer_capacity: DEFAULT_SYNC_BUFFER_CAPACITY,
            data_dir: default_data_dir(),
        }
    }
}

/// `DATA_DIR` from the environment, or `./data`
fn default_data_dir() -> PathBuf {
    PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()))
}

impl EngineConfig {
    /// Load from a JSON file; missing or broken files give the defaults
    pub async fn load(path: &Path) -> Self {
        zone_core::persistence::load_json(path, "engine config").await
    }

    #[must_use] pub fn insight_ttl(&self) -> Duration {
        Duration::from_secs(self.insight_ttl_secs)
    }

    #[must_use] pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}
