//! Seams to the host and cloud collaborators
//!
//! The engine never talks to a network or to the host's entity registry
//! directly. Everything outbound goes through these traits.

use crate::error::EngineError;
use crate::model::{LightAction, SwitchKind};
use async_trait::async_trait;

/// Cloud sync endpoint for snapshots and learned light actions
#[async_trait]
pub trait SyncSink: Send + Sync {
    /// Send a presence snapshot payload
    async fn send_snapshot(&self, payload: serde_json::Value) -> Result<(), EngineError>;

    /// Send a captured light action
    async fn send_light_action(&self, action: &LightAction) -> Result<(), EngineError>;
}

/// Host-side creation of per-zone switch entities
pub trait SwitchSink: Send + Sync {
    /// Create (or return) the switch entity for a zone; idempotent
    fn upsert(&self, zone_id: &str, kind: SwitchKind) -> String;

    /// Remove a switch that is no longer backed by an eligible zone
    fn remove(&self, _zone_id: &str, _kind: SwitchKind) {}
}

/// Natural-language insight source
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(&self, zone_id: &str) -> Result<String, EngineError>;
}

/// Light level and sun position
pub trait EnvironmentProvider: Send + Sync {
    /// Sun elevation in degrees, if known
    fn sun_elevation(&self) -> Option<f64>;

    /// Illuminance of a zone in lux, if known
    fn illuminance(&self, _zone_id: &str) -> Option<f64> {
        None
    }
}

/// Fixed environment readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StaticEnvironment {
    pub sun_elevation: Option<f64>,
    pub illuminance: Option<f64>,
}

impl EnvironmentProvider for StaticEnvironment {
    fn sun_elevation(&self) -> Option<f64> {
        self.sun_elevation
    }

    fn illuminance(&self, _zone_id: &str) -> Option<f64> {
        self.illuminance
    }
}
