//! Error types for the activity engine

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use zone_core::RegistryError;

/// Errors that can occur in the activity engine
///
/// None of these are fatal to the host: callers log them and skip the
/// current cycle or fall back.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Clock input moved backwards for a zone
    #[error("Invalid timestamp for zone {zone}: {now} is before last update {last}")]
    InvalidTimestamp {
        zone: String,
        now: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// Unknown feature name
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Rule not found
    #[error("Rule not found: {0}")]
    UnknownRule(String),

    /// Invalid time format in a condition
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// Insight generation did not answer in time
    #[error("Insight generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// Insight generation failed
    #[error("Insight generation failed: {0}")]
    GenerationFailure(String),

    /// Sync collaborator unreachable
    #[error("Sync unavailable: {0}")]
    SyncUnavailable(String),

    /// Zone registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
