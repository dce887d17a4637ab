//! Generic selector resolution against the zone registry

use crate::model::GenericSelector;
use std::collections::BTreeSet;
use std::sync::Arc;
use zone_core::ZoneRegistry;

/// Resolves abstract selectors to concrete entity ids
pub struct SelectorResolver {
    registry: Arc<ZoneRegistry>,
}

impl SelectorResolver {
    #[must_use] pub fn new(registry: Arc<ZoneRegistry>) -> Self {
        Self { registry }
    }

    /// Entity ids matching a selector, sorted and deduplicated
    ///
    /// `current` binds to `zone_id`. Unknown zones resolve to nothing.
    #[must_use] pub fn resolve(&self, selector: &GenericSelector, zone_id: &str) -> Vec<String> {
        let zone = selector.zone.resolve(zone_id);
        let members = self.registry.get_zone_members(zone);
        members
            .iter()
            .filter(|e| e.matches(&selector.domain, selector.device_class.as_deref()))
            .map(|e| e.entity_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Resolve every selector of a rule, in selector order
    #[must_use] pub fn resolve_all(&self, selectors: &[GenericSelector], zone_id: &str) -> Vec<Vec<String>> {
        selectors
            .iter()
            .map(|selector| self.resolve(selector, zone_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zone_core::EntityRef;

    fn resolver() -> SelectorResolver {
        let registry = Arc::new(ZoneRegistry::new());
        registry.refresh_zone(
            "kitchen",
            "Kitchen",
            vec![
                EntityRef::new("light.kitchen_spots", None),
                EntityRef::new("light.kitchen_ceiling", None),
                EntityRef::new("binary_sensor.kitchen_motion", Some("motion")),
                EntityRef::new("binary_sensor.kitchen_door", Some("door")),
            ],
        );
        registry.refresh_zone(
            "hallway",
            "Hallway",
            vec![EntityRef::new("light.hallway", None)],
        );
        SelectorResolver::new(registry)
    }

    #[test]
    fn test_current_binds_to_evaluated_zone() {
        let resolver = resolver();
        let lights = GenericSelector::new("light");
        assert_eq!(
            resolver.resolve(&lights, "kitchen"),
            vec!["light.kitchen_ceiling", "light.kitchen_spots"]
        );
        assert_eq!(resolver.resolve(&lights, "hallway"), vec!["light.hallway"]);
        assert!(resolver.resolve(&lights, "attic").is_empty());
    }

    #[test]
    fn test_device_class_and_fixed_zone() {
        let resolver = resolver();
        let motion = GenericSelector::new("binary_sensor").with_device_class("motion");
        assert_eq!(
            resolver.resolve(&motion, "kitchen"),
            vec!["binary_sensor.kitchen_motion"]
        );

        let hallway = GenericSelector::new("light").in_zone("hallway");
        assert_eq!(resolver.resolve(&hallway, "kitchen"), vec!["light.hallway"]);
    }
}
