//! Per-zone activity tracking
//!
//! Raw presence flips between true and false many times a minute. The
//! tracker smooths it into three levels:
//!
//! - `none`: no presence signal
//! - `presence`: signal on, for less than the occupation threshold
//! - `occupation`: signal on continuously for at least the threshold
//!
//! Any false signal drops the zone straight back to `none`. Time only
//! enters through the caller-provided clock, so the whole machine is
//! deterministic and replayable.

use crate::error::EngineError;
use crate::model::{elapsed_secs, span_secs, ActivityLevel, ActivityState};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Default presence -> occupation threshold
pub const DEFAULT_OCCUPATION_THRESHOLD_SECS: u64 = 60;

/// Result of feeding one signal to the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityUpdate {
    pub zone_id: String,
    /// Level before the update
    pub previous: ActivityLevel,
    /// State after the update
    pub state: ActivityState,
}

impl ActivityUpdate {
    /// Whether the level changed
    #[must_use] pub fn changed(&self) -> bool {
        self.previous != self.state.level
    }
}

/// Apply one presence signal to a state
///
/// `now` must not be earlier than `state.last_update`; the tracker checks
/// that before calling.
#[must_use] pub fn step(
    state: &ActivityState,
    presence: bool,
    now: DateTime<Utc>,
    threshold: Duration,
) -> ActivityState {
    let mut next = state.clone();

    if presence {
        let since = match (state.level, state.presence_since) {
            (ActivityLevel::None, _) | (_, None) => {
                next.level = ActivityLevel::Presence;
                next.level_since = Some(now);
                now
            }
            (_, Some(since)) => since,
        };
        next.presence_since = Some(since);

        if next.level == ActivityLevel::Presence && now - since >= threshold {
            next.level = ActivityLevel::Occupation;
            next.level_since = Some(since + threshold);
        }
    } else {
        if state.level != ActivityLevel::None || state.level_since.is_none() {
            next.level_since = Some(now);
        }
        next.level = ActivityLevel::None;
        next.presence_since = None;
    }

    next.duration = next.duration_at(now);
    next.last_update = Some(now);
    next.signal = presence;
    next
}

/// Activity state for every zone
#[derive(Debug)]
pub struct ActivityTracker {
    states: DashMap<String, ActivityState>,
    threshold: Duration,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_OCCUPATION_THRESHOLD_SECS)
    }
}

impl ActivityTracker {
    /// Create a tracker with the given occupation threshold in seconds
    #[must_use] pub fn new(threshold_secs: u64) -> Self {
        Self {
            states: DashMap::new(),
            threshold: span_secs(threshold_secs),
        }
    }

    /// Occupation threshold
    #[must_use] pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Feed a presence signal for a zone
    ///
    /// A clock input earlier than the zone's last update is rejected and the
    /// state is left as it was.
    pub fn update(
        &self,
        zone_id: &str,
        presence: bool,
        now: DateTime<Utc>,
    ) -> Result<ActivityUpdate, EngineError> {
        let mut entry = self.states.entry(zone_id.to_string()).or_default();

        if let Some(last) = entry.last_update {
            if now < last {
                return Err(EngineError::InvalidTimestamp {
                    zone: zone_id.to_string(),
                    now,
                    last,
                });
            }
        }

        let previous = entry.level;
        let next = step(&entry, presence, now, self.threshold);
        *entry = next.clone();
        drop(entry);

        if previous != next.level {
            tracing::debug!(
                "Zone {} activity {} -> {} at {}",
                zone_id,
                previous,
                next.level,
                now
            );
        }

        Ok(ActivityUpdate {
            zone_id: zone_id.to_string(),
            previous,
            state: next,
        })
    }

    /// Re-apply the zone's last signal at `now`
    ///
    /// Lets a continuous presence cross the occupation threshold without a
    /// new sensor event. Unknown zones are left untouched.
    pub fn tick(
        &self,
        zone_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ActivityUpdate>, EngineError> {
        let Some(signal) = self.states.get(zone_id).map(|s| s.signal) else {
            return Ok(None);
        };
        self.update(zone_id, signal, now).map(Some)
    }

    /// Current state of a zone
    #[must_use] pub fn state(&self, zone_id: &str) -> Option<ActivityState> {
        self.states.get(zone_id).map(|s| s.value().clone())
    }

    /// Current level of a zone (`none` for unknown zones)
    #[must_use] pub fn level(&self, zone_id: &str) -> ActivityLevel {
        self.states
            .get(zone_id)
            .map_or(ActivityLevel::None, |s| s.level)
    }

    /// Seconds spent in the current level at `now`
    #[must_use] pub fn duration(&self, zone_id: &str, now: DateTime<Utc>) -> f64 {
        self.states
            .get(zone_id)
            .map_or(0.0, |s| s.duration_at(now))
    }

    /// Seconds until a zone in `presence` reaches `occupation`
    #[must_use] pub fn time_until_occupation(&self, zone_id: &str, now: DateTime<Utc>) -> Option<f64> {
        let state = self.states.get(zone_id)?;
        if state.level != ActivityLevel::Presence {
            return None;
        }
        let since = state.presence_since?;
        let threshold = self.threshold.num_milliseconds() as f64 / 1000.0;
        Some((threshold - elapsed_secs(since, now)).max(0.0))
    }

    /// States of all zones, ordered by zone id
    #[must_use] pub fn all_states(&self) -> Vec<(String, ActivityState)> {
        let mut states: Vec<_> = self
            .states
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Forget a zone
    pub fn reset(&self, zone_id: &str) {
        self.states.remove(zone_id);
    }

    /// Force a zone into a level at `now`
    ///
    /// Diagnostic override. The clock is validated like `update`, and the
    /// presence interval is backdated so the forced level stays consistent
    /// with later signals.
    pub fn simulate(
        &self,
        zone_id: &str,
        level: ActivityLevel,
        now: DateTime<Utc>,
    ) -> Result<ActivityState, EngineError> {
        let mut entry = self.states.entry(zone_id.to_string()).or_default();

        if let Some(last) = entry.last_update {
            if now < last {
                return Err(EngineError::InvalidTimestamp {
                    zone: zone_id.to_string(),
                    now,
                    last,
                });
            }
        }

        let presence_since = match level {
            ActivityLevel::None => None,
            ActivityLevel::Presence => Some(now),
            ActivityLevel::Occupation => Some(
                now.checked_sub_signed(self.threshold)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
        };
        *entry = ActivityState {
            level,
            presence_since,
            level_since: Some(now),
            duration: 0.0,
            last_update: Some(now),
            signal: level != ActivityLevel::None,
        };

        tracing::debug!("Zone {} activity forced to {}", zone_id, level);
        Ok(entry.clone())
    }
}
