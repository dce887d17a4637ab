//! Zone rule engine
//!
//! Evaluation of one rule against one zone goes through three gates in a
//! fixed order: selector resolution, feature flags, then the rule body.
//! `evaluate` is side-effect free apart from counters; `run` applies the
//! per-zone cooldown and plans service calls for the matches.

use crate::error::EngineError;
use crate::evaluator::{RuleBody, RuleScope};
use crate::executor::ActionExecutor;
use crate::flags::FeatureFlagManager;
use crate::model::{
    span_secs, CreateRuleRequest, MatchOutcome, MatchResult, Rule, ServiceCall, SkipReason,
};
use crate::resolver::SelectorResolver;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zone_core::persistence;

/// Default minimum time between two firings of a rule in one zone
pub const DEFAULT_RULE_COOLDOWN_SECS: u64 = 30;

/// Rule engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RuleStats {
    /// Rule evaluations
    pub triggers: u64,
    /// Matches that produced service calls
    pub executions: u64,
    /// Evaluations skipped by a feature flag
    pub gated: u64,
    /// Matches suppressed by the cooldown
    pub cooldown_blocks: u64,
}

/// Results of running every rule for a zone
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub results: Vec<MatchResult>,
    pub calls: Vec<ServiceCall>,
}

/// Registry and evaluator of zone rules
pub struct RuleEngine {
    rules: DashMap<String, Rule>,
    resolver: SelectorResolver,
    flags: Arc<FeatureFlagManager>,
    executor: ActionExecutor,
    last_fired: DashMap<(String, String), DateTime<Utc>>,
    cooldown: Duration,
    triggers: AtomicU64,
    executions: AtomicU64,
    gated: AtomicU64,
    cooldown_blocks: AtomicU64,
    data_path: Option<PathBuf>,
}

impl RuleEngine {
    /// Create an engine with no rules
    #[must_use] pub fn new(
        resolver: SelectorResolver,
        flags: Arc<FeatureFlagManager>,
        executor: ActionExecutor,
        cooldown_secs: u64,
    ) -> Self {
        Self {
            rules: DashMap::new(),
            resolver,
            flags,
            executor,
            last_fired: DashMap::new(),
            cooldown: span_secs(cooldown_secs),
            triggers: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            gated: AtomicU64::new(0),
            cooldown_blocks: AtomicU64::new(0),
            data_path: None,
        }
    }

    /// Load rules from `rules.json` in `data_dir`
    ///
    /// With no stored rules the automatic lighting defaults are installed.
    pub async fn load(&mut self, data_dir: &Path) {
        let data_path = data_dir.join("rules.json");
        let stored: Vec<Rule> = persistence::load_json(&data_path, "rules").await;
        let rules = if stored.is_empty() {
            Rule::autolight_rules()
        } else {
            stored
        };
        for rule in rules {
            self.rules.insert(rule.id.clone(), rule);
        }
        self.data_path = Some(data_path);
    }

    /// Persist rules, if they were loaded from disk
    pub async fn save(&self) -> Result<(), EngineError> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        persistence::save_json(path, &self.list(), "rules").await?;
        Ok(())
    }

    /// Register or replace a rule
    pub fn add(&self, rule: Rule) {
        tracing::info!("Registered rule {} ({})", rule.id, rule.name);
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Create a rule from a request and persist
    pub async fn create(&self, request: CreateRuleRequest) -> Result<Rule, EngineError> {
        let rule = Rule::from_request(request);
        self.add(rule.clone());
        self.save().await?;
        Ok(rule)
    }

    /// Delete a rule and persist
    pub async fn delete(&self, id: &str) -> Result<Rule, EngineError> {
        let (_, rule) = self
            .rules
            .remove(id)
            .ok_or_else(|| EngineError::UnknownRule(id.to_string()))?;
        self.last_fired.retain(|(_, rule_id), _| rule_id != id);
        self.save().await?;
        tracing::info!("Deleted rule {}", id);
        Ok(rule)
    }

    /// Enable or disable a rule
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut rule = self
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownRule(id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    /// Get a rule by id
    #[must_use] pub fn get(&self, id: &str) -> Option<Rule> {
        self.rules.get(id).map(|r| r.value().clone())
    }

    /// All rules, ordered by id
    #[must_use] pub fn list(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Evaluate one rule against one zone
    pub fn evaluate(
        &self,
        rule: &Rule,
        zone_id: &str,
        body: &dyn RuleBody,
        now: DateTime<Utc>,
    ) -> MatchResult {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        let result = |outcome| MatchResult {
            rule_id: rule.id.clone(),
            zone_id: zone_id.to_string(),
            outcome,
        };

        if !rule.enabled {
            return result(MatchOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        }

        let resolved = self.resolver.resolve_all(&rule.selectors, zone_id);
        if let Some(selector) = rule
            .selectors
            .iter()
            .zip(&resolved)
            .position(|(selector, ids)| selector.required && ids.is_empty())
        {
            tracing::debug!(
                "Rule {} inapplicable in zone {}: selector {} matched nothing",
                rule.id,
                zone_id,
                selector
            );
            return result(MatchOutcome::Skipped {
                reason: SkipReason::Inapplicable { selector },
            });
        }

        if let Some(&feature) = rule
            .features
            .iter()
            .find(|f| !self.flags.is_enabled(zone_id, **f))
        {
            self.gated.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "Rule {} skipped in zone {}: {} is off",
                rule.id,
                zone_id,
                feature
            );
            return result(MatchOutcome::Skipped {
                reason: SkipReason::FeatureGated { feature },
            });
        }

        let scope = RuleScope {
            zone_id,
            resolved: &resolved,
            now,
        };
        match body.matches(rule, &scope) {
            Ok(true) => result(MatchOutcome::Matched { entities: resolved }),
            Ok(false) => result(MatchOutcome::ConditionsNotMet),
            Err(e) => {
                tracing::warn!("Rule {} failed in zone {}: {}", rule.id, zone_id, e);
                result(MatchOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Evaluate every rule for a zone and plan calls for the matches
    pub fn run(&self, zone_id: &str, body: &dyn RuleBody, now: DateTime<Utc>) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        for rule in self.list() {
            let mut result = self.evaluate(&rule, zone_id, body, now);
            let matched = match &result.outcome {
                MatchOutcome::Matched { entities } => Some(entities.clone()),
                _ => None,
            };

            if let Some(entities) = matched {
                let key = (zone_id.to_string(), rule.id.clone());
                let cooling = self
                    .last_fired
                    .get(&key)
                    .is_some_and(|last| now - *last < self.cooldown);

                if cooling {
                    self.cooldown_blocks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Rule {} cooling down in zone {}", rule.id, zone_id);
                    result.outcome = MatchOutcome::Skipped {
                        reason: SkipReason::Cooldown,
                    };
                } else {
                    let calls = self.executor.plan(&rule, zone_id, &entities);
                    if !calls.is_empty() {
                        self.executions.fetch_add(1, Ordering::Relaxed);
                        self.last_fired.insert(key, now);
                        tracing::info!(
                            "Rule {} fired in zone {} ({} calls)",
                            rule.id,
                            zone_id,
                            calls.len()
                        );
                    }
                    outcome.calls.extend(calls);
                }
            }

            outcome.results.push(result);
        }

        outcome
    }

    /// Engine counters
    #[must_use] pub fn stats(&self) -> RuleStats {
        RuleStats {
            triggers: self.triggers.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            gated: self.gated.load(Ordering::Relaxed),
            cooldown_blocks: self.cooldown_blocks.load(Ordering::Relaxed),
        }
    }

    /// Feature flag table the engine gates on
    #[must_use] pub fn flags(&self) -> &Arc<FeatureFlagManager> {
        &self.flags
    }
}
