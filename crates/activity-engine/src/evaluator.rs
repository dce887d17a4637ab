//! Condition evaluation for zone rules

use crate::collaborator::EnvironmentProvider;
use crate::error::EngineError;
use crate::model::{Condition, Rule};
use crate::tracker::ActivityTracker;
use chrono::{DateTime, Datelike, Local, NaiveTime, Utc};
use std::sync::Arc;
use zone_core::PresenceBoard;

/// Default illuminance below which a zone is dark (lux)
pub const DEFAULT_DARK_THRESHOLD_LUX: f64 = 20.0;
/// Default sun elevation below which it is dark (degrees)
pub const DEFAULT_SUN_ELEVATION_THRESHOLD: f64 = 3.0;

/// What a rule body sees when it is asked to decide
#[derive(Debug, Clone, Copy)]
pub struct RuleScope<'a> {
    /// Zone under evaluation
    pub zone_id: &'a str,
    /// Resolved entity ids, one list per selector
    pub resolved: &'a [Vec<String>],
    /// Evaluation clock
    pub now: DateTime<Utc>,
}

/// Rule logic run after selectors resolved and features passed
pub trait RuleBody: Send + Sync {
    fn matches(&self, rule: &Rule, scope: &RuleScope<'_>) -> Result<bool, EngineError>;
}

/// Built-in body: evaluates the rule's declarative conditions
pub struct ConditionEvaluator {
    tracker: Arc<ActivityTracker>,
    board: Arc<PresenceBoard>,
    environment: Arc<dyn EnvironmentProvider>,
    dark_threshold_lux: f64,
    sun_elevation_threshold: f64,
}

impl ConditionEvaluator {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        board: Arc<PresenceBoard>,
        environment: Arc<dyn EnvironmentProvider>,
    ) -> Self {
        Self {
            tracker,
            board,
            environment,
            dark_threshold_lux: DEFAULT_DARK_THRESHOLD_LUX,
            sun_elevation_threshold: DEFAULT_SUN_ELEVATION_THRESHOLD,
        }
    }

    /// Override the darkness thresholds
    #[must_use] pub fn with_thresholds(mut self, dark_threshold_lux: f64, sun_elevation_threshold: f64) -> Self {
        self.dark_threshold_lux = dark_threshold_lux;
        self.sun_elevation_threshold = sun_elevation_threshold;
        self
    }

    /// Evaluate all conditions (all must pass for AND semantics)
    pub fn evaluate_all(
        &self,
        conditions: &[Condition],
        scope: &RuleScope<'_>,
    ) -> Result<bool, EngineError> {
        for condition in conditions {
            if !self.evaluate(condition, scope)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a single condition
    pub fn evaluate(&self, condition: &Condition, scope: &RuleScope<'_>) -> Result<bool, EngineError> {
        match condition {
            Condition::Activity { zone, levels } => {
                let level = self.tracker.level(zone.resolve(scope.zone_id));
                Ok(levels.contains(&level))
            }
            Condition::IsDark { zone } => Ok(self.is_dark(zone.resolve(scope.zone_id))),
            Condition::PresenceScoreAbove { zone, threshold } => Ok(self
                .board
                .latest(zone.resolve(scope.zone_id))
                .is_some_and(|snapshot| snapshot.presence_score >= *threshold)),
            Condition::TimeRange { start, end } => {
                let now = scope.now.with_timezone(&Local).time();
                evaluate_time_range(start, end, now)
            }
            Condition::DayOfWeek { days } => {
                if days.is_empty() {
                    return Ok(true); // Empty means every day
                }
                let today = scope.now.with_timezone(&Local).weekday().num_days_from_monday();
                Ok(days.iter().any(|d| u32::from(*d) == today))
            }
            Condition::And { conditions } => self.evaluate_all(conditions, scope),
            Condition::Or { conditions } => {
                for c in conditions {
                    if self.evaluate(c, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { condition } => Ok(!self.evaluate(condition, scope)?),
        }
    }

    /// Whether a zone is dark
    ///
    /// Uses the zone's latest luminosity, then the environment's reading, and
    /// the sun elevation. With no input at all the zone is not dark.
    #[must_use] pub fn is_dark(&self, zone_id: &str) -> bool {
        let illuminance = self
            .board
            .latest(zone_id)
            .and_then(|snapshot| snapshot.luminosity)
            .or_else(|| self.environment.illuminance(zone_id));
        let sun_elevation = self.environment.sun_elevation();

        illuminance.is_some_and(|lux| lux < self.dark_threshold_lux)
            || sun_elevation.is_some_and(|elevation| elevation < self.sun_elevation_threshold)
    }
}

impl RuleBody for ConditionEvaluator {
    fn matches(&self, rule: &Rule, scope: &RuleScope<'_>) -> Result<bool, EngineError> {
        self.evaluate_all(&rule.conditions, scope)
    }
}

/// Check a local time against an `HH:MM` range; the range may wrap midnight
pub fn evaluate_time_range(start: &str, end: &str, now: NaiveTime) -> Result<bool, EngineError> {
    let start_time = parse_time(start)?;
    let end_time = parse_time(end)?;

    let in_range = if start_time <= end_time {
        now >= start_time && now <= end_time
    } else {
        // Wrap-around (e.g., 22:00 to 06:00)
        now >= start_time || now <= end_time
    };
    Ok(in_range)
}

/// Parse a time string (HH:MM or HH:MM:SS)
fn parse_time(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| EngineError::InvalidTimeFormat(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::StaticEnvironment;
    use crate::model::{ActivityLevel, EnvironmentContext, ZoneBinding};
    use zone_core::{PresenceScorer, RawPresence};

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn setup(environment: StaticEnvironment) -> (Arc<ActivityTracker>, Arc<PresenceBoard>, ConditionEvaluator) {
        let tracker = Arc::new(ActivityTracker::default());
        let board = Arc::new(PresenceBoard::new());
        let evaluator = ConditionEvaluator::new(tracker.clone(), board.clone(), Arc::new(environment));
        (tracker, board, evaluator)
    }

    fn scope(now: DateTime<Utc>) -> RuleScope<'static> {
        RuleScope {
            zone_id: "kitchen",
            resolved: &[],
            now,
        }
    }

    #[test]
    fn test_time_range_normal_and_wrapping() {
        assert!(evaluate_time_range("09:00", "17:00", time("12:30")).unwrap());
        assert!(!evaluate_time_range("09:00", "17:00", time("18:00")).unwrap());
        assert!(evaluate_time_range("22:00", "06:00", time("23:15")).unwrap());
        assert!(evaluate_time_range("22:00", "06:00", time("05:00")).unwrap());
        assert!(!evaluate_time_range("22:00", "06:00", time("12:00")).unwrap());
        assert!(matches!(
            evaluate_time_range("25:00", "06:00", time("05:00")),
            Err(EngineError::InvalidTimeFormat(_))
        ));
    }

    #[test]
    fn test_activity_condition_reads_tracker() {
        let (tracker, _, evaluator) = setup(StaticEnvironment::default());
        let now = Utc::now();
        let present = Condition::Activity {
            zone: ZoneBinding::Current,
            levels: vec![ActivityLevel::Presence, ActivityLevel::Occupation],
        };

        assert!(!evaluator.evaluate(&present, &scope(now)).unwrap());
        tracker.update("kitchen", true, now).unwrap();
        assert!(evaluator.evaluate(&present, &scope(now)).unwrap());
        assert!(!evaluator
            .evaluate(&Condition::Not { condition: Box::new(present) }, &scope(now))
            .unwrap());
    }

    #[test]
    fn test_is_dark_uses_whichever_inputs_exist() {
        let (_, board, evaluator) = setup(StaticEnvironment::default());
        assert!(!evaluator.is_dark("kitchen"));

        let scorer = PresenceScorer::default();
        let dim = RawPresence {
            luminosity: Some(5.0),
            ..Default::default()
        };
        board.record(scorer.snapshot("kitchen", &dim, Utc::now()));
        assert!(evaluator.is_dark("kitchen"));

        let (_, _, low_sun) = setup(StaticEnvironment {
            sun_elevation: Some(-4.0),
            illuminance: Some(300.0),
        });
        assert!(low_sun.is_dark("kitchen"));

        let (_, _, bright) = setup(StaticEnvironment {
            sun_elevation: Some(40.0),
            illuminance: Some(300.0),
        });
        assert!(!bright.is_dark("kitchen"));
    }

    #[test]
    fn test_presence_score_and_boolean_combinators() {
        let (_, board, evaluator) = setup(StaticEnvironment::default());
        let scorer = PresenceScorer::default();
        let raw = RawPresence {
            motion: true,
            ..Default::default()
        };
        board.record(scorer.snapshot("kitchen", &raw, Utc::now()));

        let above = |threshold| Condition::PresenceScoreAbove {
            zone: ZoneBinding::Current,
            threshold,
        };
        let now = Utc::now();
        assert!(evaluator.evaluate(&above(0.4), &scope(now)).unwrap());
        assert!(!evaluator.evaluate(&above(0.5), &scope(now)).unwrap());
        assert!(evaluator
            .evaluate(
                &Condition::Or {
                    conditions: vec![above(0.9), above(0.1)]
                },
                &scope(now)
            )
            .unwrap());
        assert!(!evaluator
            .evaluate(
                &Condition::And {
                    conditions: vec![above(0.9), above(0.1)]
                },
                &scope(now)
            )
            .unwrap());
        assert!(evaluator
            .evaluate(&Condition::DayOfWeek { days: vec![] }, &scope(now))
            .unwrap());
    }

    #[test]
    fn test_weekday_matches_learned_action_context() {
        let (_, _, evaluator) = setup(StaticEnvironment::default());
        let now = Utc::now();
        let today = EnvironmentContext::at(now, None, None).day_of_week;
        let today = u8::try_from(today).unwrap();
        let tomorrow = (today + 1) % 7;

        assert!(evaluator
            .evaluate(&Condition::DayOfWeek { days: vec![today] }, &scope(now))
            .unwrap());
        assert!(!evaluator
            .evaluate(&Condition::DayOfWeek { days: vec![tomorrow] }, &scope(now))
            .unwrap());
    }
}
