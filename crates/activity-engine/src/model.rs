//! Data models for the activity engine

use crate::error::EngineError;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zone_core::Context;

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Hysteresis-smoothed presence classification of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    #[default]
    None,
    Presence,
    Occupation,
}

impl ActivityLevel {
    #[must_use] pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Presence => "presence",
            Self::Occupation => "occupation",
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity state of one zone
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityState {
    /// Current level
    pub level: ActivityLevel,
    /// Start of the current unbroken presence interval
    pub presence_since: Option<DateTime<Utc>>,
    /// Entry into the current level
    pub level_since: Option<DateTime<Utc>>,
    /// Seconds spent in the current level as of `last_update`
    pub duration: f64,
    /// Last accepted clock input
    pub last_update: Option<DateTime<Utc>>,
    /// Last presence signal applied
    pub signal: bool,
}

impl ActivityState {
    /// Seconds spent in the current level at `now`
    #[must_use] pub fn duration_at(&self, now: DateTime<Utc>) -> f64 {
        self.level_since
            .map_or(0.0, |since| elapsed_secs(since, now).max(0.0))
    }
}

/// Seconds between two instants (negative if `to` is earlier)
pub(crate) fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Configured seconds as a time delta, saturating at `TimeDelta::MAX`
pub(crate) fn span_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

// ---------------------------------------------------------------------------
// Feature flags
// ---------------------------------------------------------------------------

/// Capability categories gated per zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AutomaticLighting,
    PresenceDetection,
    ActivityTracking,
    ClimateControl,
    SecurityMode,
}

impl Feature {
    /// All features, in declaration order
    pub const ALL: [Feature; 5] = [
        Feature::AutomaticLighting,
        Feature::PresenceDetection,
        Feature::ActivityTracking,
        Feature::ClimateControl,
        Feature::SecurityMode,
    ];

    #[must_use] pub fn as_str(self) -> &'static str {
        match self {
            Self::AutomaticLighting => "automatic_lighting",
            Self::PresenceDetection => "presence_detection",
            Self::ActivityTracking => "activity_tracking",
            Self::ClimateControl => "climate_control",
            Self::SecurityMode => "security_mode",
        }
    }

    /// Value of the flag in a zone that was never configured
    #[must_use] pub fn default_enabled(self) -> bool {
        matches!(
            self,
            Self::AutomaticLighting | Self::PresenceDetection | Self::ActivityTracking
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| EngineError::UnknownFeature(s.to_string()))
    }
}

/// The five flags of one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlagSet {
    pub automatic_lighting: bool,
    pub presence_detection: bool,
    pub activity_tracking: bool,
    pub climate_control: bool,
    pub security_mode: bool,
}

impl Default for FeatureFlagSet {
    fn default() -> Self {
        Self {
            automatic_lighting: Feature::AutomaticLighting.default_enabled(),
            presence_detection: Feature::PresenceDetection.default_enabled(),
            activity_tracking: Feature::ActivityTracking.default_enabled(),
            climate_control: Feature::ClimateControl.default_enabled(),
            security_mode: Feature::SecurityMode.default_enabled(),
        }
    }
}

impl FeatureFlagSet {
    #[must_use] pub fn get(&self, feature: Feature) -> bool {
        match feature {
            Feature::AutomaticLighting => self.automatic_lighting,
            Feature::PresenceDetection => self.presence_detection,
            Feature::ActivityTracking => self.activity_tracking,
            Feature::ClimateControl => self.climate_control,
            Feature::SecurityMode => self.security_mode,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::AutomaticLighting => &mut self.automatic_lighting,
            Feature::PresenceDetection => &mut self.presence_detection,
            Feature::ActivityTracking => &mut self.activity_tracking,
            Feature::ClimateControl => &mut self.climate_control,
            Feature::SecurityMode => &mut self.security_mode,
        };
        *slot = enabled;
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Zone a selector is evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ZoneBinding {
    /// The zone under evaluation
    #[default]
    Current,
    /// A fixed zone id
    Zone(String),
}

impl ZoneBinding {
    /// Bind the placeholder to the zone under evaluation
    #[must_use] pub fn resolve<'a>(&'a self, current_zone: &'a str) -> &'a str {
        match self {
            Self::Current => current_zone,
            Self::Zone(zone) => zone,
        }
    }
}

impl From<String> for ZoneBinding {
    fn from(value: String) -> Self {
        if value == "current" {
            Self::Current
        } else {
            Self::Zone(value)
        }
    }
}

impl From<ZoneBinding> for String {
    fn from(value: ZoneBinding) -> Self {
        match value {
            ZoneBinding::Current => "current".to_string(),
            ZoneBinding::Zone(zone) => zone,
        }
    }
}

impl Serialize for ZoneBinding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.resolve("current"))
    }
}

impl<'de> Deserialize<'de> for ZoneBinding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Abstract entity selector: domain + optional device class + zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericSelector {
    /// Entity domain (e.g., "light")
    pub domain: String,
    /// Device class filter; `None` matches every class in the domain
    #[serde(default)]
    pub device_class: Option<String>,
    /// Zone binding
    #[serde(default)]
    pub zone: ZoneBinding,
    /// Whether the rule is inapplicable when this resolves to nothing
    #[serde(default = "default_true")]
    pub required: bool,
}

impl GenericSelector {
    /// Required selector for a domain in the current zone
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            device_class: None,
            zone: ZoneBinding::Current,
            required: true,
        }
    }

    #[must_use] pub fn with_device_class(mut self, device_class: impl Into<String>) -> Self {
        self.device_class = Some(device_class.into());
        self
    }

    #[must_use] pub fn in_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.zone = ZoneBinding::Zone(zone_id.into());
        self
    }

    #[must_use] pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A zone-scoped automation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the rule is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Feature categories that must be enabled in the zone
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Entity selectors, referenced by index from actions
    #[serde(default)]
    pub selectors: Vec<GenericSelector>,
    /// Conditions that must all hold
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Actions to run on a match
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Conditions evaluated by the built-in rule body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Zone activity is one of the given levels
    Activity {
        #[serde(default)]
        zone: ZoneBinding,
        levels: Vec<ActivityLevel>,
    },
    /// Zone is dark (illuminance below threshold or sun low)
    IsDark {
        #[serde(default)]
        zone: ZoneBinding,
    },
    /// Latest presence score is at least the threshold
    PresenceScoreAbove {
        #[serde(default)]
        zone: ZoneBinding,
        threshold: f64,
    },
    /// Local time within a range (HH:MM, may wrap past midnight)
    TimeRange { start: String, end: String },
    /// Local day of week (0=Monday, like `EnvironmentContext::day_of_week`);
    /// empty means every day
    DayOfWeek { days: Vec<u8> },
    /// Logical AND of multiple conditions
    And { conditions: Vec<Condition> },
    /// Logical OR of multiple conditions
    Or { conditions: Vec<Condition> },
    /// Negate a condition
    Not { condition: Box<Condition> },
}

/// Actions a rule can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Turn on the entities resolved by a selector
    TurnOn {
        selector: usize,
        #[serde(default)]
        brightness_pct: Option<u8>,
    },
    /// Turn off the entities resolved by a selector
    TurnOff { selector: usize },
    /// Dim lights that are on by a percentage step
    Dim { selector: usize, step_pct: u8 },
    /// Log a message
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
}

/// Log levels for log actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Request to create a new rule
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub selectors: Vec<GenericSelector>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Create a rule with a generated id
    #[must_use] pub fn from_request(request: CreateRuleRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            enabled: request.enabled,
            features: request.features,
            selectors: request.selectors,
            conditions: request.conditions,
            actions: request.actions,
        }
    }

    /// Default automatic lighting rules
    ///
    /// Lights go on when someone arrives in a dark zone and go off once the
    /// zone is empty. Reaching occupation does nothing, so manual changes made
    /// since arrival stay in place.
    #[must_use] pub fn autolight_rules() -> Vec<Rule> {
        let lights = GenericSelector::new(zone_core::domains::LIGHT);
        vec![
            Rule {
                id: "autolight_on".to_string(),
                name: "Automatic lighting on".to_string(),
                description: Some("Turn lights on when presence is detected in the dark".to_string()),
                enabled: true,
                features: vec![Feature::AutomaticLighting],
                selectors: vec![lights.clone()],
                conditions: vec![
                    Condition::Activity {
                        zone: ZoneBinding::Current,
                        levels: vec![ActivityLevel::Presence],
                    },
                    Condition::IsDark {
                        zone: ZoneBinding::Current,
                    },
                ],
                actions: vec![Action::TurnOn {
                    selector: 0,
                    brightness_pct: Some(100),
                }],
            },
            Rule {
                id: "autolight_off".to_string(),
                name: "Automatic lighting off".to_string(),
                description: Some("Turn lights off when the zone is empty".to_string()),
                enabled: true,
                features: vec![Feature::AutomaticLighting],
                selectors: vec![lights],
                conditions: vec![Condition::Activity {
                    zone: ZoneBinding::Current,
                    levels: vec![ActivityLevel::None],
                }],
                actions: vec![Action::TurnOff { selector: 0 }],
            },
        ]
    }
}

/// Why a rule was not evaluated for a zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Rule is disabled
    Disabled,
    /// A required selector matched no entity in the zone
    Inapplicable { selector: usize },
    /// A feature the rule requires is off for the zone
    FeatureGated { feature: Feature },
    /// Rule fired too recently for this zone
    Cooldown,
}

/// Outcome of evaluating one rule against one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Conditions held; entities resolved per selector, sorted by id
    Matched { entities: Vec<Vec<String>> },
    /// Rule applied but its conditions did not hold
    ConditionsNotMet,
    /// Rule was not evaluated
    Skipped { reason: SkipReason },
    /// Rule body failed
    Failed { error: String },
}

/// Result of `RuleEngine::evaluate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub rule_id: String,
    pub zone_id: String,
    #[serde(flatten)]
    pub outcome: MatchOutcome,
}

impl MatchResult {
    #[must_use] pub fn is_match(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Matched { .. })
    }
}

/// Service call produced by a matched rule, tagged with its own context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    /// Service domain (e.g., "light")
    pub domain: String,
    /// Service name (e.g., "turn_on")
    pub service: String,
    /// Target entities, sorted by id
    pub entity_ids: Vec<String>,
    /// Service data
    pub data: serde_json::Value,
    /// Context the host must attach to the call
    pub context: Context,
    /// Rule that produced the call
    pub rule_id: String,
    /// Zone the rule was evaluated for
    pub zone_id: String,
}

// ---------------------------------------------------------------------------
// Light learning
// ---------------------------------------------------------------------------

/// On/off state of a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightPower {
    On,
    #[default]
    Off,
}

/// Light state attributes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightAttributes {
    pub state: LightPower,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_color: Option<[f64; 2]>,
}

impl LightAttributes {
    /// A light that is on with a brightness
    #[must_use] pub fn on(brightness: Option<u8>) -> Self {
        Self {
            state: LightPower::On,
            brightness,
            ..Default::default()
        }
    }

    /// A light that is off
    #[must_use] pub fn off() -> Self {
        Self::default()
    }

    #[must_use] pub fn is_on(&self) -> bool {
        self.state == LightPower::On
    }

    /// Attributes worth recording; an off light carries none
    #[must_use] pub fn recorded(&self) -> Self {
        if self.is_on() {
            self.clone()
        } else {
            Self::off()
        }
    }
}

/// A light state change reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightStateChange {
    pub entity_id: String,
    #[serde(default)]
    pub old: Option<LightAttributes>,
    pub new: LightAttributes,
    pub context: Context,
    pub timestamp: DateTime<Utc>,
}

/// Kind of manual light change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    TurnOn,
    TurnOff,
    Brightness,
    ColorTemp,
    Color,
}

/// Environment around a light change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    /// Zone illuminance in lux
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illuminance: Option<f64>,
    /// Sun elevation in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sun_elevation: Option<f64>,
    /// Local hour (0-23)
    pub hour: u32,
    /// Local day of week (0=Monday, like `Condition::DayOfWeek`)
    pub day_of_week: u32,
}

impl EnvironmentContext {
    /// Build the context for an instant, using local wall-clock time
    #[must_use] pub fn at(
        timestamp: DateTime<Utc>,
        illuminance: Option<f64>,
        sun_elevation: Option<f64>,
    ) -> Self {
        let local = timestamp.with_timezone(&Local);
        Self {
            illuminance,
            sun_elevation,
            hour: local.hour(),
            day_of_week: local.weekday().num_days_from_monday(),
        }
    }
}

/// Immutable record of a manual light change with its context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightAction {
    pub entity_id: String,
    pub zone_id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    /// Zone activity at capture time
    pub activity: ActivityLevel,
    /// Seconds in the current activity level, rounded to 0.1
    pub activity_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<LightAttributes>,
    pub resulting: LightAttributes,
    pub presence_detected: bool,
    #[serde(flatten)]
    pub environment: EnvironmentContext,
    pub context_id: String,
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Kinds of generated switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchKind {
    AutomaticLighting,
}

impl SwitchKind {
    #[must_use] pub fn as_str(self) -> &'static str {
        match self {
            Self::AutomaticLighting => "automatic_lighting",
        }
    }
}

/// Reason code for an eligibility decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    Eligible,
    MissingLight,
    MissingPresenceSensor,
    MissingBoth,
    UnknownZone,
}

/// Whether a zone qualifies for an automation switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub zone_id: String,
    pub eligible: bool,
    pub reason: EligibilityReason,
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// Where an insight came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Cached,
    Generated,
    Default,
}

/// Zone-scoped insight text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "zone")]
    pub zone_id: String,
    pub text: String,
    pub provenance: Provenance,
}
