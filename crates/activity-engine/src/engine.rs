//! Activity engine orchestrator
//!
//! Host events come in through `handle`; what the host must do comes back as
//! `Intent`s. The engine itself performs no I/O apart from persistence and
//! the optional sync dispatch.

use crate::collaborator::{EnvironmentProvider, InsightGenerator, SwitchSink, SyncSink};
use crate::config::EngineConfig;
use crate::eligibility::EligibilityEvaluator;
use crate::error::EngineError;
use crate::evaluator::ConditionEvaluator;
use crate::executor::{ActionExecutor, LightStates};
use crate::flags::FeatureFlagManager;
use crate::insights::InsightsManager;
use crate::model::{
    ActionType, ActivityLevel, Feature, Insight, LightAction, LightStateChange, MatchOutcome,
    ServiceCall, SkipReason, SwitchKind,
};
use crate::origin::OriginTracker;
use crate::recorder::LightLearningRecorder;
use crate::resolver::SelectorResolver;
use crate::rule_engine::RuleEngine;
use crate::tracker::{ActivityTracker, ActivityUpdate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use zone_core::{PresenceBoard, PresenceScorer, RawPresence, RegistryEvent, ZoneRegistry};

/// Host event fed to the engine
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Fresh presence signals for a zone
    Presence { zone_id: String, raw: RawPresence },
    /// A light changed state
    LightChanged(LightStateChange),
    /// A zone's topology changed
    RegistryChanged { zone_id: String },
    /// A feature flag was written from outside
    FlagChanged {
        zone_id: String,
        feature: Feature,
        enabled: bool,
    },
}

/// Work the host has to carry out
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Send a presence snapshot to the sync endpoint
    SyncSnapshot(serde_json::Value),
    /// Send a captured light action to the sync endpoint
    SyncLightAction(LightAction),
    /// Call a host service
    Service(ServiceCall),
    /// A zone switch now exists and should be exposed
    UpsertSwitch {
        zone_id: String,
        kind: SwitchKind,
        entity_id: String,
    },
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A zone's activity level changed
    ActivityChanged {
        zone_id: String,
        from: ActivityLevel,
        to: ActivityLevel,
        at: DateTime<Utc>,
    },
    /// A rule matched in a zone
    RuleMatched { rule_id: String, zone_id: String },
    /// A rule was skipped in a zone
    RuleSkipped {
        rule_id: String,
        zone_id: String,
        reason: SkipReason,
    },
    /// A manual light change was captured
    LightActionCaptured {
        entity_id: String,
        zone_id: String,
        action_type: ActionType,
    },
    /// A zone switch was created
    SwitchUpserted { zone_id: String, entity_id: String },
}

/// Host-provided collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub environment: Arc<dyn EnvironmentProvider>,
    pub switches: Arc<dyn SwitchSink>,
    pub insight_generator: Option<Arc<dyn InsightGenerator>>,
}

/// The activity engine
pub struct ActivityEngine {
    registry: Arc<ZoneRegistry>,
    tracker: Arc<ActivityTracker>,
    scorer: PresenceScorer,
    board: Arc<PresenceBoard>,
    flags: Arc<FeatureFlagManager>,
    lights: Arc<LightStates>,
    rules: Arc<RuleEngine>,
    evaluator: Arc<ConditionEvaluator>,
    eligibility: Arc<EligibilityEvaluator>,
    recorder: Arc<LightLearningRecorder>,
    insights: Arc<InsightsManager>,
    collaborators: Collaborators,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl ActivityEngine {
    /// Create an in-memory engine with the default rules
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(ZoneRegistry::new());
        let flags = Arc::new(FeatureFlagManager::new());
        let origins = Arc::new(OriginTracker::default());
        let lights = Arc::new(LightStates::new());
        let rules = Self::rule_engine(config, &registry, &flags, &origins, &lights);
        for rule in crate::model::Rule::autolight_rules() {
            rules.add(rule);
        }
        Self::assemble(config, collaborators, registry, flags, origins, lights, rules)
    }

    /// Create an engine backed by the files in `config.data_dir`
    pub async fn load(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(ZoneRegistry::load(&config.data_dir).await);
        let flags = Arc::new(FeatureFlagManager::load(&config.data_dir).await);
        let origins = Arc::new(OriginTracker::default());
        let lights = Arc::new(LightStates::new());
        let mut rules = Self::rule_engine(config, &registry, &flags, &origins, &lights);
        rules.load(&config.data_dir).await;
        Self::assemble(config, collaborators, registry, flags, origins, lights, rules)
    }

    /// Persist zones, flags and rules
    pub async fn save(&self) -> Result<(), EngineError> {
        self.registry.save().await?;
        self.flags.save().await?;
        self.rules.save().await?;
        Ok(())
    }

    fn rule_engine(
        config: &EngineConfig,
        registry: &Arc<ZoneRegistry>,
        flags: &Arc<FeatureFlagManager>,
        origins: &Arc<OriginTracker>,
        lights: &Arc<LightStates>,
    ) -> RuleEngine {
        RuleEngine::new(
            SelectorResolver::new(registry.clone()),
            flags.clone(),
            ActionExecutor::new(flags.clone(), origins.clone(), lights.clone()),
            config.rule_cooldown_secs,
        )
    }

    fn assemble(
        config: &EngineConfig,
        collaborators: Collaborators,
        registry: Arc<ZoneRegistry>,
        flags: Arc<FeatureFlagManager>,
        origins: Arc<OriginTracker>,
        lights: Arc<LightStates>,
        rules: RuleEngine,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let tracker = Arc::new(ActivityTracker::new(config.occupation_threshold_secs));
        let board = Arc::new(PresenceBoard::new());

        let evaluator = ConditionEvaluator::new(
            tracker.clone(),
            board.clone(),
            collaborators.environment.clone(),
        )
        .with_thresholds(config.dark_threshold_lux, config.sun_elevation_threshold);

        let recorder = LightLearningRecorder::new(
            registry.clone(),
            tracker.clone(),
            origins,
            board.clone(),
            config.sync_buffer_capacity,
        );

        let insights = InsightsManager::new(
            collaborators.insight_generator.clone(),
            config.insight_ttl(),
            config.generation_timeout(),
        );

        Self {
            eligibility: Arc::new(EligibilityEvaluator::new(registry.clone())),
            registry,
            tracker,
            scorer: PresenceScorer::new(config.presence_weights),
            board,
            flags,
            lights,
            rules: Arc::new(rules),
            evaluator: Arc::new(evaluator),
            recorder: Arc::new(recorder),
            insights: Arc::new(insights),
            collaborators,
            event_tx,
        }
    }

    /// Start reacting to registry changes
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut rx = self.registry.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(RegistryEvent::ZoneRefreshed { zone_id, generation }) => {
                        tracing::debug!("Zone {} refreshed (generation {})", zone_id, generation);
                        engine.handle(InboundEvent::RegistryChanged { zone_id }, Utc::now());
                    }
                    Ok(RegistryEvent::ZoneStale { zone_id }) => {
                        tracing::info!("Zone {} went stale, keeping its state", zone_id);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Activity engine lagged by {} registry events", n);
                        for zone_id in engine.registry.zone_ids() {
                            engine.handle(InboundEvent::RegistryChanged { zone_id }, Utc::now());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Registry event channel closed");
                        break;
                    }
                }
            }
        });
    }

    /// Subscribe to engine events
    #[must_use] pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Process one host event
    pub fn handle(&self, event: InboundEvent, now: DateTime<Utc>) -> Vec<Intent> {
        match event {
            InboundEvent::Presence { zone_id, raw } => self.handle_presence(&zone_id, &raw, now),
            InboundEvent::LightChanged(change) => self.handle_light_change(&change),
            InboundEvent::RegistryChanged { zone_id } => self.reconcile_zone(&zone_id),
            InboundEvent::FlagChanged {
                zone_id,
                feature,
                enabled,
            } => {
                self.flags.set(&zone_id, feature, enabled);
                Vec::new()
            }
        }
    }

    fn handle_presence(&self, zone_id: &str, raw: &RawPresence, now: DateTime<Utc>) -> Vec<Intent> {
        let update = match self.tracker.update(zone_id, raw.is_present(), now) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Dropping presence update: {}", e);
                return Vec::new();
            }
        };

        let snapshot = self.scorer.snapshot(zone_id, raw, now);
        let mut intents = vec![Intent::SyncSnapshot(snapshot.to_payload())];
        self.board.record(snapshot);

        if update.changed() {
            self.announce(&update, now);
            intents.extend(self.evaluate_zone(zone_id, now));
        }
        intents
    }

    fn handle_light_change(&self, change: &LightStateChange) -> Vec<Intent> {
        self.lights.record(&change.entity_id, change.new.state);

        if let Some(zone_id) = self.registry.zone_of_entity(&change.entity_id) {
            match self.tracker.tick(&zone_id, change.timestamp) {
                Ok(Some(update)) if update.changed() => self.announce(&update, change.timestamp),
                Ok(_) => {}
                Err(e) => tracing::debug!("Not advancing activity for light change: {}", e),
            }
        }

        let Some(action) = self
            .recorder
            .capture(change, self.collaborators.environment.as_ref())
        else {
            return Vec::new();
        };

        let _ = self.event_tx.send(EngineEvent::LightActionCaptured {
            entity_id: action.entity_id.clone(),
            zone_id: action.zone_id.clone(),
            action_type: action.action_type,
        });
        vec![Intent::SyncLightAction(action)]
    }

    fn reconcile_zone(&self, zone_id: &str) -> Vec<Intent> {
        let kind = SwitchKind::AutomaticLighting;
        let existed = self.eligibility.switch_for(zone_id, kind).is_some();

        match self
            .eligibility
            .reconcile(zone_id, self.collaborators.switches.as_ref())
        {
            Some(entity_id) if !existed => {
                let _ = self.event_tx.send(EngineEvent::SwitchUpserted {
                    zone_id: zone_id.to_string(),
                    entity_id: entity_id.clone(),
                });
                vec![Intent::UpsertSwitch {
                    zone_id: zone_id.to_string(),
                    kind,
                    entity_id,
                }]
            }
            _ => Vec::new(),
        }
    }

    fn announce(&self, update: &ActivityUpdate, at: DateTime<Utc>) {
        tracing::info!(
            "Zone {} is now {} (was {})",
            update.zone_id,
            update.state.level,
            update.previous
        );
        let _ = self.event_tx.send(EngineEvent::ActivityChanged {
            zone_id: update.zone_id.clone(),
            from: update.previous,
            to: update.state.level,
            at,
        });
    }

    /// Run every rule for a zone and return the resulting service calls
    pub fn evaluate_zone(&self, zone_id: &str, now: DateTime<Utc>) -> Vec<Intent> {
        let outcome = self.rules.run(zone_id, self.evaluator.as_ref(), now);

        for result in &outcome.results {
            let event = match &result.outcome {
                MatchOutcome::Matched { .. } => EngineEvent::RuleMatched {
                    rule_id: result.rule_id.clone(),
                    zone_id: result.zone_id.clone(),
                },
                MatchOutcome::Skipped { reason } => EngineEvent::RuleSkipped {
                    rule_id: result.rule_id.clone(),
                    zone_id: result.zone_id.clone(),
                    reason: reason.clone(),
                },
                MatchOutcome::ConditionsNotMet | MatchOutcome::Failed { .. } => continue,
            };
            let _ = self.event_tx.send(event);
        }

        outcome.calls.into_iter().map(Intent::Service).collect()
    }

    /// Advance every tracked zone to `now`
    ///
    /// Zones whose level changed (presence turning into occupation) get
    /// their rules run.
    pub fn poll(&self, now: DateTime<Utc>) -> Vec<Intent> {
        let mut intents = Vec::new();
        for (zone_id, _) in self.tracker.all_states() {
            match self.tracker.tick(&zone_id, now) {
                Ok(Some(update)) if update.changed() => {
                    self.announce(&update, now);
                    intents.extend(self.evaluate_zone(&zone_id, now));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping poll: {}", e),
            }
        }
        intents
    }

    /// Send sync intents; returns the intents left for the host
    pub async fn dispatch_sync(&self, intents: Vec<Intent>, sink: &dyn SyncSink) -> Vec<Intent> {
        let mut remaining = Vec::new();
        for intent in intents {
            match intent {
                Intent::SyncSnapshot(payload) => {
                    if let Err(e) = sink.send_snapshot(payload).await {
                        tracing::warn!("Failed to sync presence snapshot: {}", e);
                    }
                }
                Intent::SyncLightAction(action) => {
                    self.recorder.dispatch(action, sink).await;
                }
                other => remaining.push(other),
            }
        }
        remaining
    }

    /// Insight for a zone; never fails
    pub async fn get_insight(&self, zone_id: &str) -> Insight {
        self.insights.get_insight(zone_id).await
    }

    #[must_use] pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    #[must_use] pub fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }

    #[must_use] pub fn board(&self) -> &Arc<PresenceBoard> {
        &self.board
    }

    #[must_use] pub fn flags(&self) -> &Arc<FeatureFlagManager> {
        &self.flags
    }

    #[must_use] pub fn lights(&self) -> &Arc<LightStates> {
        &self.lights
    }

    #[must_use] pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    #[must_use] pub fn eligibility(&self) -> &Arc<EligibilityEvaluator> {
        &self.eligibility
    }

    #[must_use] pub fn recorder(&self) -> &Arc<LightLearningRecorder> {
        &self.recorder
    }

    #[must_use] pub fn insights(&self) -> &Arc<InsightsManager> {
        &self.insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::StaticEnvironment;
    use crate::model::{LightAttributes, Provenance};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;
    use zone_core::{Context, EntityRef};

    #[derive(Default)]
    struct Switches {
        created: Mutex<Vec<String>>,
    }

    impl SwitchSink for Switches {
        fn upsert(&self, zone_id: &str, kind: SwitchKind) -> String {
            self.created.lock().unwrap().push(zone_id.to_string());
            format!("switch.{}_{}", zone_id, kind.as_str())
        }
    }

    #[derive(Default)]
    struct Outbox {
        snapshots: Mutex<Vec<serde_json::Value>>,
        actions: Mutex<Vec<LightAction>>,
    }

    #[async_trait]
    impl SyncSink for Outbox {
        async fn send_snapshot(&self, payload: serde_json::Value) -> Result<(), EngineError> {
            self.snapshots.lock().unwrap().push(payload);
            Ok(())
        }

        async fn send_light_action(&self, action: &LightAction) -> Result<(), EngineError> {
            self.actions.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    fn engine(sun_elevation: f64) -> (Arc<Switches>, ActivityEngine) {
        let switches = Arc::new(Switches::default());
        let engine = ActivityEngine::new(
            &EngineConfig::default(),
            Collaborators {
                environment: Arc::new(StaticEnvironment {
                    sun_elevation: Some(sun_elevation),
                    illuminance: None,
                }),
                switches: switches.clone(),
                insight_generator: None,
            },
        );
        for zone in ["kitchen", "bedroom"] {
            engine.registry().refresh_zone(
                zone,
                zone,
                vec![
                    EntityRef::new(format!("light.{zone}"), None),
                    EntityRef::new(format!("binary_sensor.{zone}_motion"), Some("motion")),
                ],
            );
        }
        (switches, engine)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T21:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn motion(zone: &str, on: bool) -> InboundEvent {
        InboundEvent::Presence {
            zone_id: zone.to_string(),
            raw: RawPresence {
                motion: on,
                ..Default::default()
            },
        }
    }

    fn services(intents: &[Intent]) -> Vec<&ServiceCall> {
        intents
            .iter()
            .filter_map(|i| match i {
                Intent::Service(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_presence_in_the_dark_turns_lights_on_then_off() {
        let (_, engine) = engine(-8.0);

        let intents = engine.handle(motion("kitchen", true), t0());
        assert!(matches!(intents[0], Intent::SyncSnapshot(_)));
        let on = services(&intents);
        assert_eq!(on.len(), 1);
        assert_eq!(on[0].service, "turn_on");
        assert_eq!(on[0].entity_ids, vec!["light.kitchen"]);

        // Same level again does not re-run rules
        let intents = engine.handle(motion("kitchen", true), t0() + Duration::seconds(5));
        assert!(services(&intents).is_empty());

        let intents = engine.handle(motion("kitchen", false), t0() + Duration::seconds(45));
        let off = services(&intents);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].service, "turn_off");
    }

    #[test]
    fn test_daylight_keeps_lights_off() {
        let (_, engine) = engine(35.0);
        let intents = engine.handle(motion("kitchen", true), t0());
        assert!(services(&intents).is_empty());
    }

    #[test]
    fn test_bedroom_flag_gates_only_bedroom() {
        let (_, engine) = engine(-8.0);
        let mut rx = engine.subscribe();
        engine.handle(
            InboundEvent::FlagChanged {
                zone_id: "bedroom".to_string(),
                feature: Feature::AutomaticLighting,
                enabled: false,
            },
            t0(),
        );

        assert!(services(&engine.handle(motion("bedroom", true), t0())).is_empty());
        assert_eq!(services(&engine.handle(motion("kitchen", true), t0())).len(), 1);

        let mut gated = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::RuleSkipped {
                zone_id,
                reason: SkipReason::FeatureGated { .. },
                ..
            } = event
            {
                assert_eq!(zone_id, "bedroom");
                gated = true;
            }
        }
        assert!(gated);
    }

    #[test]
    fn test_backwards_clock_produces_no_intents() {
        let (_, engine) = engine(-8.0);
        engine.handle(motion("kitchen", true), t0());
        let intents = engine.handle(motion("kitchen", false), t0() - Duration::seconds(1));
        assert!(intents.is_empty());
        assert_eq!(engine.tracker().level("kitchen"), ActivityLevel::Presence);
    }

    #[test]
    fn test_registry_change_creates_switch_once() {
        let (switches, engine) = engine(-8.0);
        let first = engine.handle(
            InboundEvent::RegistryChanged {
                zone_id: "kitchen".to_string(),
            },
            t0(),
        );
        let second = engine.handle(
            InboundEvent::RegistryChanged {
                zone_id: "kitchen".to_string(),
            },
            t0(),
        );

        assert_eq!(
            first,
            vec![Intent::UpsertSwitch {
                zone_id: "kitchen".to_string(),
                kind: SwitchKind::AutomaticLighting,
                entity_id: "switch.kitchen_automatic_lighting".to_string(),
            }]
        );
        assert!(second.is_empty());
        assert_eq!(switches.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_dim_is_learned_but_own_calls_are_not() {
        let (_, engine) = engine(-8.0);
        let intents = engine.handle(motion("kitchen", true), t0());
        let own_call = services(&intents)[0].clone();

        // The engine's own turn_on comes back as a state change
        let echoed = engine.handle(
            InboundEvent::LightChanged(LightStateChange {
                entity_id: "light.kitchen".to_string(),
                old: Some(LightAttributes::off()),
                new: LightAttributes::on(Some(255)),
                context: own_call.context.clone(),
                timestamp: t0() + Duration::seconds(1),
            }),
            t0() + Duration::seconds(1),
        );
        assert!(echoed.is_empty());

        engine.handle(motion("kitchen", true), t0() + Duration::seconds(60));
        let at = t0() + Duration::milliseconds(187_300);
        let intents = engine.handle(
            InboundEvent::LightChanged(LightStateChange {
                entity_id: "light.kitchen".to_string(),
                old: Some(LightAttributes::on(Some(255))),
                new: LightAttributes::on(Some(204)),
                context: Context::with_user("alice"),
                timestamp: at,
            }),
            at,
        );

        let [Intent::SyncLightAction(action)] = intents.as_slice() else {
            panic!("expected one light action, got {intents:?}");
        };
        assert_eq!(action.activity, ActivityLevel::Occupation);
        assert!((action.activity_duration - 127.3).abs() < 1e-9);
        assert_eq!(action.action_type, ActionType::Brightness);
    }

    #[test]
    fn test_poll_promotes_presence_to_occupation() {
        let (_, engine) = engine(-8.0);
        engine.handle(motion("kitchen", true), t0());
        let mut rx = engine.subscribe();

        engine.poll(t0() + Duration::seconds(30));
        assert_eq!(engine.tracker().level("kitchen"), ActivityLevel::Presence);

        engine.poll(t0() + Duration::seconds(61));
        assert_eq!(engine.tracker().level("kitchen"), ActivityLevel::Occupation);
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::ActivityChanged {
                to: ActivityLevel::Occupation,
                ..
            }
        ));
    }

    #[test]
    fn test_occupation_keeps_a_manual_dim() {
        let (_, engine) = engine(-8.0);
        assert_eq!(services(&engine.handle(motion("kitchen", true), t0())).len(), 1);

        let at = t0() + Duration::seconds(20);
        let learned = engine.handle(
            InboundEvent::LightChanged(LightStateChange {
                entity_id: "light.kitchen".to_string(),
                old: Some(LightAttributes::on(Some(255))),
                new: LightAttributes::on(Some(40)),
                context: Context::with_user("alice"),
                timestamp: at,
            }),
            at,
        );
        assert!(matches!(learned.as_slice(), [Intent::SyncLightAction(_)]));

        let intents = engine.poll(t0() + Duration::seconds(61));
        assert_eq!(engine.tracker().level("kitchen"), ActivityLevel::Occupation);
        assert!(services(&intents).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_sync_leaves_host_intents() {
        let (_, engine) = engine(-8.0);
        let outbox = Outbox::default();
        let intents = engine.handle(motion("kitchen", true), t0());

        let remaining = engine.dispatch_sync(intents, &outbox).await;
        assert_eq!(outbox.snapshots.lock().unwrap().len(), 1);
        assert!(remaining.iter().all(|i| matches!(i, Intent::Service(_))));
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_insight_without_generator_is_default() {
        let (_, engine) = engine(-8.0);
        let insight = engine.get_insight("kitchen").await;
        assert_eq!(insight.provenance, Provenance::Default);
        assert_eq!(insight.zone_id, "kitchen");
    }

    #[tokio::test]
    async fn test_started_engine_reacts_to_registry() {
        let (switches, engine) = engine(-8.0);
        let engine = Arc::new(engine);
        let mut rx = engine.subscribe();
        engine.start();

        engine.registry().refresh_zone(
            "office",
            "Office",
            vec![
                EntityRef::new("light.office", None),
                EntityRef::new("binary_sensor.office_presence", Some("presence")),
            ],
        );

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            EngineEvent::SwitchUpserted {
                zone_id: "office".to_string(),
                entity_id: "switch.office_automatic_lighting".to_string(),
            }
        );
        assert_eq!(*switches.created.lock().unwrap(), vec!["office".to_string()]);
    }

    #[tokio::test]
    async fn test_load_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let collaborators = Collaborators {
            environment: Arc::new(StaticEnvironment::default()),
            switches: Arc::new(Switches::default()),
            insight_generator: None,
        };

        let engine = ActivityEngine::load(&config, collaborators.clone()).await;
        assert_eq!(engine.rules().list().len(), 2);
        engine.registry().refresh_zone(
            "kitchen",
            "Kitchen",
            vec![EntityRef::new("light.kitchen", None)],
        );
        engine.flags().set("kitchen", Feature::SecurityMode, true);
        engine.save().await.unwrap();

        let reloaded = ActivityEngine::load(&config, collaborators).await;
        assert_eq!(reloaded.registry().zone_ids(), vec!["kitchen".to_string()]);
        assert!(reloaded.flags().is_enabled("kitchen", Feature::SecurityMode));
        assert_eq!(reloaded.rules().list().len(), 2);
    }
}
