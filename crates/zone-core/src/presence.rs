//! Presence snapshots and scoring
//!
//! A zone's raw presence signals (motion, presence, media) are folded into a
//! single score in `[0, 1]`. Luminosity travels with the snapshot as context
//! but never contributes to the score.

use crate::entity::{device_classes, domains, EntityRef};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Media player activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    #[default]
    Off,
    Idle,
    Paused,
    Playing,
    On,
}

impl MediaState {
    /// Parse a host media player state string
    #[must_use] pub fn from_state(state: &str) -> Self {
        match state {
            "playing" => Self::Playing,
            "on" => Self::On,
            "paused" => Self::Paused,
            "idle" | "standby" | "buffering" => Self::Idle,
            _ => Self::Off,
        }
    }

    /// Normalized activity indicator in `[0, 1]`
    #[must_use] pub fn activity(self) -> f64 {
        match self {
            Self::Playing | Self::On => 1.0,
            Self::Paused => 0.5,
            Self::Idle | Self::Off => 0.0,
        }
    }

    /// Whether the player counts as someone being there
    #[must_use] pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::On)
    }
}

/// Raw presence signals for one zone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPresence {
    #[serde(default)]
    pub motion: bool,
    #[serde(default)]
    pub presence: bool,
    #[serde(default)]
    pub occupancy: bool,
    #[serde(default)]
    pub media: MediaState,
    /// Average illuminance in lux
    #[serde(default)]
    pub luminosity: Option<f64>,
}

impl RawPresence {
    /// Fold entity states of a zone into raw signals
    ///
    /// Any active sensor of a class sets that signal; illuminance sensors are
    /// averaged; the most active media player wins.
    pub fn from_states<'a>(states: impl IntoIterator<Item = (&'a EntityRef, &'a str)>) -> Self {
        let mut raw = Self::default();
        let mut lux_values = Vec::new();

        for (entity, state) in states {
            match entity.domain.as_str() {
                domains::BINARY_SENSOR => {
                    let on = state == "on";
                    match entity.device_class.as_deref() {
                        Some(device_classes::MOTION) => raw.motion |= on,
                        Some(device_classes::PRESENCE) => raw.presence |= on,
                        Some(device_classes::OCCUPANCY) => raw.occupancy |= on,
                        _ => {}
                    }
                }
                domains::SENSOR
                    if entity.device_class.as_deref() == Some(device_classes::ILLUMINANCE) =>
                {
                    if let Ok(lux) = state.parse::<f64>() {
                        if lux.is_finite() {
                            lux_values.push(lux);
                        }
                    }
                }
                domains::MEDIA_PLAYER => {
                    let media = MediaState::from_state(state);
                    if media.activity() > raw.media.activity() {
                        raw.media = media;
                    }
                }
                _ => {}
            }
        }

        if !lux_values.is_empty() {
            raw.luminosity = Some(lux_values.iter().sum::<f64>() / lux_values.len() as f64);
        }
        raw
    }

    /// Binary presence: any presence sensor on or media actively playing
    #[must_use] pub fn is_present(&self) -> bool {
        self.motion || self.presence || self.occupancy || self.media.is_active()
    }
}

/// Weights for the presence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceWeights {
    pub motion: f64,
    pub presence: f64,
    pub media: f64,
}

impl Default for PresenceWeights {
    fn default() -> Self {
        Self {
            motion: 0.4,
            presence: 0.4,
            media: 0.2,
        }
    }
}

impl PresenceWeights {
    /// Negative or non-finite weights count as zero
    #[must_use] pub fn cleaned(self) -> Self {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        Self {
            motion: clean(self.motion),
            presence: clean(self.presence),
            media: clean(self.media),
        }
    }

    /// Sum of the cleaned weights
    #[must_use] pub fn total(self) -> f64 {
        let w = self.cleaned();
        w.motion + w.presence + w.media
    }

    /// Scale weights so they sum to 1.0
    ///
    /// If nothing is left after cleaning the weights stay all-zero.
    #[must_use] pub fn normalized(self) -> Self {
        let w = self.cleaned();
        let total = w.total();
        if total <= 0.0 {
            return w;
        }
        Self {
            motion: w.motion / total,
            presence: w.presence / total,
            media: w.media / total,
        }
    }
}

/// Pure weighted presence scorer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceScorer {
    weights: PresenceWeights,
    total: f64,
}

impl Default for PresenceScorer {
    fn default() -> Self {
        Self::new(PresenceWeights::default())
    }
}

impl PresenceScorer {
    #[must_use] pub fn new(weights: PresenceWeights) -> Self {
        let weights = weights.cleaned();
        Self {
            weights,
            total: weights.total(),
        }
    }

    /// Effective (normalized) weights
    #[must_use] pub fn weights(&self) -> PresenceWeights {
        self.weights.normalized()
    }

    /// Score raw signals into `[0, 1]`
    ///
    /// The weighted sum is divided by the weight total once, so the maximal
    /// combination scores exactly 1.0 for any weights.
    #[must_use] pub fn score(&self, raw: &RawPresence) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        let indicator = |on: bool| if on { 1.0 } else { 0.0 };
        let sum = self.weights.motion * indicator(raw.motion)
            + self.weights.presence * indicator(raw.presence || raw.occupancy)
            + self.weights.media * raw.media.activity();
        (sum / self.total).clamp(0.0, 1.0)
    }

    /// Build the current snapshot for a zone
    #[must_use] pub fn snapshot(
        &self,
        zone_id: &str,
        raw: &RawPresence,
        timestamp: DateTime<Utc>,
    ) -> PresenceSnapshot {
        PresenceSnapshot {
            zone_id: zone_id.to_string(),
            timestamp,
            motion: raw.motion,
            presence: raw.presence || raw.occupancy,
            media: raw.media,
            luminosity: raw.luminosity,
            presence_score: self.score(raw),
        }
    }
}

/// Current presence picture of a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub zone_id: String,
    pub timestamp: DateTime<Utc>,
    pub motion: bool,
    pub presence: bool,
    pub media: MediaState,
    pub luminosity: Option<f64>,
    pub presence_score: f64,
}

impl PresenceSnapshot {
    /// Whether the snapshot indicates someone is there
    #[must_use] pub fn is_present(&self) -> bool {
        self.motion || self.presence || self.media.is_active()
    }

    /// Sync payload for the cloud collaborator
    #[must_use] pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "room": self.zone_id,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "entities": {
                "motion": self.motion,
                "presence": self.presence,
                "media": self.media,
                "luminosity": self.luminosity.unwrap_or(0.0),
            },
            "presence_score": self.presence_score,
        })
    }
}

/// Latest snapshot per zone; older snapshots are replaced, not kept
#[derive(Debug, Default)]
pub struct PresenceBoard {
    latest: DashMap<String, PresenceSnapshot>,
}

impl PresenceBoard {
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Replace the zone's snapshot
    pub fn record(&self, snapshot: PresenceSnapshot) {
        self.latest.insert(snapshot.zone_id.clone(), snapshot);
    }

    /// Current snapshot of a zone
    #[must_use] pub fn latest(&self, zone_id: &str) -> Option<PresenceSnapshot> {
        self.latest.get(zone_id).map(|s| s.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(motion: bool, presence: bool, media: MediaState) -> RawPresence {
        RawPresence {
            motion,
            presence,
            media,
            ..Default::default()
        }
    }

    #[test]
    fn test_maximal_combination_scores_one() {
        let scorer = PresenceScorer::default();
        assert_eq!(scorer.score(&raw(true, true, MediaState::Playing)), 1.0);

        let uneven = PresenceScorer::new(PresenceWeights {
            motion: 0.1,
            presence: 0.2,
            media: 0.3,
        });
        assert_eq!(uneven.score(&raw(true, true, MediaState::Playing)), 1.0);
        assert_eq!(uneven.score(&raw(true, true, MediaState::On)), 1.0);
    }

    #[test]
    fn test_score_is_deterministic_and_bounded() {
        let scorer = PresenceScorer::default();
        let medias = [
            MediaState::Off,
            MediaState::Idle,
            MediaState::Paused,
            MediaState::Playing,
            MediaState::On,
        ];
        for motion in [false, true] {
            for presence in [false, true] {
                for media in medias {
                    let input = raw(motion, presence, media);
                    let first = scorer.score(&input);
                    assert_eq!(first, scorer.score(&input));
                    assert!((0.0..=1.0).contains(&first));
                }
            }
        }
    }

    #[test]
    fn test_luminosity_does_not_affect_score() {
        let scorer = PresenceScorer::default();
        let dark = RawPresence {
            motion: true,
            luminosity: Some(2.0),
            ..Default::default()
        };
        let bright = RawPresence {
            luminosity: Some(900.0),
            ..dark.clone()
        };
        assert_eq!(scorer.score(&dark), scorer.score(&bright));
        assert!((scorer.score(&dark) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_weights_are_normalized() {
        let scorer = PresenceScorer::new(PresenceWeights {
            motion: 2.0,
            presence: 2.0,
            media: -1.0,
        });
        let w = scorer.weights();
        assert!((w.motion - 0.5).abs() < 1e-12);
        assert_eq!(w.media, 0.0);
        assert_eq!(scorer.score(&raw(true, true, MediaState::Off)), 1.0);

        let zero = PresenceScorer::new(PresenceWeights {
            motion: 0.0,
            presence: 0.0,
            media: 0.0,
        });
        assert_eq!(zero.score(&raw(true, true, MediaState::Playing)), 0.0);
    }

    #[test]
    fn test_from_states_folds_zone_entities() {
        let motion = EntityRef::new("binary_sensor.den_motion", Some("motion"));
        let lux_a = EntityRef::new("sensor.den_lux_a", Some("illuminance"));
        let lux_b = EntityRef::new("sensor.den_lux_b", Some("illuminance"));
        let tv = EntityRef::new("media_player.den_tv", None);
        let speaker = EntityRef::new("media_player.den_speaker", None);

        let raw = RawPresence::from_states(vec![
            (&motion, "off"),
            (&lux_a, "10"),
            (&lux_b, "30"),
            (&tv, "paused"),
            (&speaker, "playing"),
        ]);

        assert!(!raw.motion);
        assert_eq!(raw.luminosity, Some(20.0));
        assert_eq!(raw.media, MediaState::Playing);
        assert!(raw.is_present());
    }

    #[test]
    fn test_snapshot_payload_shape() {
        let scorer = PresenceScorer::default();
        let ts = DateTime::parse_from_rfc3339("2024-03-01T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let snapshot = scorer.snapshot("kitchen", &raw(true, false, MediaState::Off), ts);
        let payload = snapshot.to_payload();

        assert_eq!(payload["room"], "kitchen");
        assert_eq!(payload["timestamp"], "2024-03-01T18:30:00Z");
        assert_eq!(payload["entities"]["motion"], true);
        assert_eq!(payload["entities"]["media"], "off");
        assert_eq!(payload["entities"]["luminosity"], 0.0);
    }

    #[test]
    fn test_board_keeps_only_latest() {
        let board = PresenceBoard::new();
        let scorer = PresenceScorer::default();
        let t0 = Utc::now();
        board.record(scorer.snapshot("hall", &raw(true, false, MediaState::Off), t0));
        board.record(scorer.snapshot("hall", &raw(false, false, MediaState::Off), t0));
        let latest = board.latest("hall").unwrap();
        assert!(!latest.motion);
        assert_eq!(latest.presence_score, 0.0);
    }
}
