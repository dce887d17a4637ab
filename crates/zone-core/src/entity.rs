//! Entity references and origin tagging

use serde::{Deserialize, Serialize};

/// Entity domains the core cares about
pub mod domains {
    pub const LIGHT: &str = "light";
    pub const BINARY_SENSOR: &str = "binary_sensor";
    pub const SENSOR: &str = "sensor";
    pub const MEDIA_PLAYER: &str = "media_player";
    pub const SWITCH: &str = "switch";
    pub const SUN: &str = "sun";
}

/// Device classes used for presence and environment sensing
pub mod device_classes {
    pub const MOTION: &str = "motion";
    pub const PRESENCE: &str = "presence";
    pub const OCCUPANCY: &str = "occupancy";
    pub const ILLUMINANCE: &str = "illuminance";
}

/// A reference to a host entity, grouped by domain and device class
///
/// Ordering is by entity id first, which keeps member sets and resolved
/// selector output in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Full entity id (e.g., "light.kitchen_ceiling")
    pub entity_id: String,
    /// Domain part of the entity id
    pub domain: String,
    /// Device class, if the entity has one
    #[serde(default)]
    pub device_class: Option<String>,
}

impl EntityRef {
    /// Create a reference, deriving the domain from the entity id
    pub fn new(entity_id: impl Into<String>, device_class: Option<&str>) -> Self {
        let entity_id = entity_id.into();
        let domain = domain_of(&entity_id).to_string();
        Self {
            entity_id,
            domain,
            device_class: device_class.map(str::to_string),
        }
    }

    /// Check domain and (optional) device class
    ///
    /// A `None` device class filter matches every entity of the domain.
    #[must_use] pub fn matches(&self, domain: &str, device_class: Option<&str>) -> bool {
        if self.domain != domain {
            return false;
        }
        match device_class {
            Some(class) => self.device_class.as_deref() == Some(class),
            None => true,
        }
    }

    /// Whether this is a motion/presence/occupancy binary sensor
    #[must_use] pub fn is_presence_sensor(&self) -> bool {
        self.domain == domains::BINARY_SENSOR
            && matches!(
                self.device_class.as_deref(),
                Some(device_classes::MOTION | device_classes::PRESENCE | device_classes::OCCUPANCY)
            )
    }
}

/// Domain part of an entity id ("light.kitchen" -> "light")
#[must_use] pub fn domain_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map_or(entity_id, |(domain, _)| domain)
}

/// Origin of a state change or service call
///
/// Every write issued by the engine carries a fresh context so that the
/// resulting state change can be told apart from a user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context
    pub id: String,
    /// User that initiated the change (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Parent context for causality chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new context with a fresh id
    #[must_use] pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Create a new context attributed to a user
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }

    /// Create a child context with this context as parent
    #[must_use] pub fn child(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_derived_from_entity_id() {
        let entity = EntityRef::new("binary_sensor.hall_motion", Some("motion"));
        assert_eq!(entity.domain, "binary_sensor");
        assert!(entity.is_presence_sensor());
    }

    #[test]
    fn test_matches_without_device_class() {
        let entity = EntityRef::new("sensor.hall_lux", Some("illuminance"));
        assert!(entity.matches("sensor", None));
        assert!(entity.matches("sensor", Some("illuminance")));
        assert!(!entity.matches("sensor", Some("temperature")));
        assert!(!entity.matches("light", None));
    }

    #[test]
    fn test_child_context_links_parent() {
        let parent = Context::with_user("alice");
        let child = parent.child();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.user_id.as_deref(), Some("alice"));
        assert_ne!(child.id, parent.id);
    }
}
