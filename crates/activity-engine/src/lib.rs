//! Activity engine
//!
//! Infers per-zone activity from presence signals, gates and evaluates
//! zone-scoped automation rules, learns from manual light changes and
//! decides which zones get automation switches.

pub mod collaborator;
pub mod config;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod flags;
pub mod insights;
pub mod logging;
pub mod model;
pub mod origin;
pub mod recorder;
pub mod resolver;
pub mod rule_engine;
pub mod tracker;

pub use collaborator::{EnvironmentProvider, InsightGenerator, SwitchSink, SyncSink};
pub use config::EngineConfig;
pub use engine::{ActivityEngine, Collaborators, EngineEvent, InboundEvent, Intent};
pub use error::EngineError;
pub use model::*;
