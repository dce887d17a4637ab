//! Zone topology layer
//!
//! This crate provides the zone registry, entity references and presence
//! scoring that the activity engine builds on.

pub mod entity;
pub mod persistence;
pub mod presence;
pub mod registry;

pub use entity::{device_classes, domains, Context, EntityRef};
pub use presence::{
    MediaState, PresenceBoard, PresenceScorer, PresenceSnapshot, PresenceWeights, RawPresence,
};
pub use registry::{RegistryError, RegistryEvent, Zone, ZoneRegistry};
