//! Zone eligibility for automation switches
//!
//! A zone gets an `automatic_lighting` switch once it has something to
//! light and something to sense presence with. Feature flags play no part.

use crate::collaborator::SwitchSink;
use crate::model::{EligibilityReason, EligibilityResult, SwitchKind};
use dashmap::DashMap;
use std::sync::Arc;
use zone_core::{device_classes, domains, Zone, ZoneRegistry};

/// Decides which zones get switches and creates them once
pub struct EligibilityEvaluator {
    registry: Arc<ZoneRegistry>,
    created: DashMap<(String, SwitchKind), String>,
}

impl EligibilityEvaluator {
    #[must_use] pub fn new(registry: Arc<ZoneRegistry>) -> Self {
        Self {
            registry,
            created: DashMap::new(),
        }
    }

    /// Evaluate a zone by id
    #[must_use] pub fn evaluate(&self, zone_id: &str) -> EligibilityResult {
        match self.registry.zone(zone_id) {
            Some(zone) => evaluate_zone(&zone),
            None => EligibilityResult {
                zone_id: zone_id.to_string(),
                eligible: false,
                reason: EligibilityReason::UnknownZone,
            },
        }
    }

    /// Create the zone's switch if it is eligible and has none yet
    ///
    /// Returns the switch entity id when the zone is eligible. A zone that
    /// lost eligibility has its switch removed.
    pub fn reconcile(&self, zone_id: &str, sink: &dyn SwitchSink) -> Option<String> {
        let kind = SwitchKind::AutomaticLighting;
        let key = (zone_id.to_string(), kind);
        let result = self.evaluate(zone_id);

        if !result.eligible {
            if self.created.remove(&key).is_some() {
                tracing::info!(
                    "Zone {} no longer eligible ({:?}), removing {} switch",
                    zone_id,
                    result.reason,
                    kind.as_str()
                );
                sink.remove(zone_id, kind);
            }
            return None;
        }

        if let Some(entity_id) = self.created.get(&key) {
            return Some(entity_id.value().clone());
        }

        let entity_id = sink.upsert(zone_id, kind);
        tracing::info!("Created {} switch {} for zone {}", kind.as_str(), entity_id, zone_id);
        self.created.insert(key, entity_id.clone());
        Some(entity_id)
    }

    /// Reconcile every known zone; returns `(zone, switch)` per eligible zone
    pub fn reconcile_all(&self, sink: &dyn SwitchSink) -> Vec<(String, String)> {
        self.registry
            .zone_ids()
            .into_iter()
            .filter_map(|zone_id| {
                self.reconcile(&zone_id, sink)
                    .map(|entity_id| (zone_id, entity_id))
            })
            .collect()
    }

    /// Switch created for a zone, if any
    #[must_use] pub fn switch_for(&self, zone_id: &str, kind: SwitchKind) -> Option<String> {
        self.created
            .get(&(zone_id.to_string(), kind))
            .map(|e| e.value().clone())
    }

    /// Zones worth tracking activity for (any presence detection, lights or not)
    #[must_use] pub fn activity_tracking_zones(&self) -> Vec<String> {
        self.registry
            .zones()
            .into_iter()
            .filter(|zone| zone.has_presence_detection())
            .map(|zone| zone.id)
            .collect()
    }
}

/// Eligibility of a zone snapshot
#[must_use] pub fn evaluate_zone(zone: &Zone) -> EligibilityResult {
    let has_light = zone.has_light();
    let has_sensor = zone.has(domains::BINARY_SENSOR, Some(device_classes::PRESENCE))
        || zone.has(domains::BINARY_SENSOR, Some(device_classes::MOTION));

    let reason = match (has_light, has_sensor) {
        (true, true) => EligibilityReason::Eligible,
        (false, true) => EligibilityReason::MissingLight,
        (true, false) => EligibilityReason::MissingPresenceSensor,
        (false, false) => EligibilityReason::MissingBoth,
    };

    EligibilityResult {
        zone_id: zone.id.clone(),
        eligible: reason == EligibilityReason::Eligible,
        reason,
    }
}
