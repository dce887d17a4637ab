//! Action executor for zone rules
//!
//! Actions never touch devices directly. They become `ServiceCall` intents
//! that the host performs, each tagged with a context the engine issued so
//! the resulting state change is not mistaken for a user action.

use crate::flags::FeatureFlagManager;
use crate::model::{Action, LightPower, LogLevel, Rule, ServiceCall};
use crate::origin::OriginTracker;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

/// Last reported on/off state per light
#[derive(Debug, Default)]
pub struct LightStates {
    power: DashMap<String, LightPower>,
}

impl LightStates {
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entity_id: &str, power: LightPower) {
        self.power.insert(entity_id.to_string(), power);
    }

    /// Lights never reported count as off
    #[must_use] pub fn is_on(&self, entity_id: &str) -> bool {
        self.power
            .get(entity_id)
            .is_some_and(|power| *power == LightPower::On)
    }
}

/// Turns matched rules into service calls
pub struct ActionExecutor {
    flags: Arc<FeatureFlagManager>,
    origins: Arc<OriginTracker>,
    lights: Arc<LightStates>,
}

impl ActionExecutor {
    #[must_use] pub fn new(
        flags: Arc<FeatureFlagManager>,
        origins: Arc<OriginTracker>,
        lights: Arc<LightStates>,
    ) -> Self {
        Self {
            flags,
            origins,
            lights,
        }
    }

    /// Plan the service calls of a matched rule
    ///
    /// Features are checked again right before acting; a flag turned off
    /// since evaluation yields no calls.
    #[must_use] pub fn plan(&self, rule: &Rule, zone_id: &str, resolved: &[Vec<String>]) -> Vec<ServiceCall> {
        if let Some(feature) = rule
            .features
            .iter()
            .find(|f| !self.flags.is_enabled(zone_id, **f))
        {
            tracing::info!(
                "Rule {} not executed in zone {}: {} turned off",
                rule.id,
                zone_id,
                feature
            );
            return Vec::new();
        }

        rule.actions
            .iter()
            .filter_map(|action| self.plan_action(rule, zone_id, resolved, action))
            .collect()
    }

    fn plan_action(
        &self,
        rule: &Rule,
        zone_id: &str,
        resolved: &[Vec<String>],
        action: &Action,
    ) -> Option<ServiceCall> {
        let (selector, service, data) = match action {
            Action::TurnOn {
                selector,
                brightness_pct,
            } => {
                let data = brightness_pct.map_or_else(|| json!({}), |pct| json!({ "brightness_pct": pct }));
                (*selector, "turn_on", data)
            }
            Action::TurnOff { selector } => (*selector, "turn_off", json!({})),
            Action::Dim { selector, step_pct } => (
                *selector,
                "turn_on",
                json!({ "brightness_step_pct": -i32::from(*step_pct) }),
            ),
            Action::Log { message, level } => {
                execute_log(message, *level);
                return None;
            }
        };

        let domain = rule.selectors.get(selector)?.domain.clone();
        let mut entity_ids = resolved.get(selector)?.clone();
        if matches!(action, Action::Dim { .. }) {
            // Dimming never switches a light on
            entity_ids.retain(|id| self.lights.is_on(id));
        }
        if entity_ids.is_empty() {
            return None;
        }

        tracing::debug!(
            "Rule {} -> {}.{} {:?} in zone {}",
            rule.id,
            domain,
            service,
            entity_ids,
            zone_id
        );

        Some(ServiceCall {
            domain,
            service: service.to_string(),
            entity_ids,
            data,
            context: self.origins.issue(),
            rule_id: rule.id.clone(),
            zone_id: zone_id.to_string(),
        })
    }
}

fn execute_log(message: &str, level: LogLevel) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "zone_rules", "{}", message),
        LogLevel::Info => tracing::info!(target: "zone_rules", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "zone_rules", "{}", message),
        LogLevel::Error => tracing::error!(target: "zone_rules", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Feature, GenericSelector};

    fn rule() -> Rule {
        Rule {
            id: "evening".to_string(),
            name: "Evening".to_string(),
            description: None,
            enabled: true,
            features: vec![Feature::AutomaticLighting],
            selectors: vec![GenericSelector::new("light")],
            conditions: vec![],
            actions: vec![
                Action::TurnOn {
                    selector: 0,
                    brightness_pct: Some(80),
                },
                Action::Dim {
                    selector: 0,
                    step_pct: 20,
                },
                Action::Log {
                    message: "evening".to_string(),
                    level: LogLevel::Info,
                },
                Action::TurnOff { selector: 3 },
            ],
        }
    }

    fn resolved() -> Vec<Vec<String>> {
        vec![vec!["light.den_lamp".to_string()]]
    }

    fn lamp_on() -> Arc<LightStates> {
        let lights = Arc::new(LightStates::new());
        lights.record("light.den_lamp", LightPower::On);
        lights
    }

    #[test]
    fn test_plan_tags_calls_with_own_contexts() {
        let flags = Arc::new(FeatureFlagManager::new());
        let origins = Arc::new(OriginTracker::default());
        let executor = ActionExecutor::new(flags, origins.clone(), lamp_on());

        let calls = executor.plan(&rule(), "den", &resolved());
        assert_eq!(calls.len(), 2);

        assert_eq!(calls[0].service, "turn_on");
        assert_eq!(calls[0].data["brightness_pct"], 80);
        assert_eq!(calls[1].data["brightness_step_pct"], -20);
        assert_ne!(calls[0].context.id, calls[1].context.id);
        assert!(calls.iter().all(|c| origins.is_own(&c.context)));
    }

    #[test]
    fn test_plan_rechecks_features() {
        let flags = Arc::new(FeatureFlagManager::new());
        let executor = ActionExecutor::new(
            flags.clone(),
            Arc::new(OriginTracker::default()),
            lamp_on(),
        );

        flags.set("den", Feature::AutomaticLighting, false);
        assert!(executor.plan(&rule(), "den", &resolved()).is_empty());
        assert_eq!(executor.plan(&rule(), "office", &resolved()).len(), 2);
    }

    #[test]
    fn test_dim_only_targets_lights_that_are_on() {
        let lights = Arc::new(LightStates::new());
        let executor = ActionExecutor::new(
            Arc::new(FeatureFlagManager::new()),
            Arc::new(OriginTracker::default()),
            lights.clone(),
        );
        let dim = Rule {
            actions: vec![Action::Dim {
                selector: 0,
                step_pct: 20,
            }],
            ..rule()
        };
        let resolved = vec![vec![
            "light.den_ceiling".to_string(),
            "light.den_lamp".to_string(),
        ]];

        // Nothing reported yet
        assert!(executor.plan(&dim, "den", &resolved).is_empty());

        lights.record("light.den_lamp", LightPower::On);
        lights.record("light.den_ceiling", LightPower::Off);
        let calls = executor.plan(&dim, "den", &resolved);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].entity_ids, vec!["light.den_lamp"]);

        // Turn on still reaches every light
        let on = executor.plan(&rule(), "den", &resolved);
        assert_eq!(on[0].entity_ids.len(), 2);
    }
}
