//! Zone registry
//!
//! Holds the zone -> member entity map populated by the host's entity
//! discovery. Zones are refreshed wholesale on a topology change and are
//! never removed mid-session, only marked stale.

use crate::entity::{domains, EntityRef};
use crate::persistence;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Registry events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A zone's membership was replaced
    ZoneRefreshed { zone_id: String, generation: u64 },
    /// A zone is no longer reported by discovery
    ZoneStale { zone_id: String },
}

/// A named physical area and its member entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone identifier (e.g., "kitchen")
    pub id: String,
    /// Display name
    pub name: String,
    /// Member entities, ordered by entity id
    #[serde(default)]
    pub members: BTreeSet<EntityRef>,
    /// Set when discovery stopped reporting this zone
    #[serde(default)]
    pub stale: bool,
    /// Incremented on every refresh
    #[serde(default)]
    pub generation: u64,
}

impl Zone {
    /// Create an empty zone
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: BTreeSet::new(),
            stale: false,
            generation: 0,
        }
    }

    /// Add a member (builder style)
    #[must_use] pub fn with_member(mut self, entity: EntityRef) -> Self {
        self.members.insert(entity);
        self
    }

    /// Members matching a domain and optional device class, in entity id order
    pub fn members_matching<'a>(
        &'a self,
        domain: &'a str,
        device_class: Option<&'a str>,
    ) -> impl Iterator<Item = &'a EntityRef> + 'a {
        self.members
            .iter()
            .filter(move |e| e.matches(domain, device_class))
    }

    /// Check for at least one matching member
    #[must_use] pub fn has(&self, domain: &str, device_class: Option<&str>) -> bool {
        self.members_matching(domain, device_class).next().is_some()
    }

    /// Check for at least one light entity
    #[must_use] pub fn has_light(&self) -> bool {
        self.has(domains::LIGHT, None)
    }

    /// Check for any presence-capable binary sensor or media player
    #[must_use] pub fn has_presence_detection(&self) -> bool {
        self.members
            .iter()
            .any(|e| e.is_presence_sensor() || e.domain == domains::MEDIA_PLAYER)
    }
}

/// Zone registry keyed by zone id
pub struct ZoneRegistry {
    /// Known zones
    zones: Arc<DashMap<String, Zone>>,
    /// Reverse index: entity id -> zone id
    entity_zones: Arc<DashMap<String, String>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<RegistryEvent>,
    /// Path to zone data file for persistence
    data_path: Option<PathBuf>,
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneRegistry {
    /// Create an empty in-memory registry
    #[must_use] pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            zones: Arc::new(DashMap::new()),
            entity_zones: Arc::new(DashMap::new()),
            event_tx,
            data_path: None,
        }
    }

    /// Create a registry backed by `zones.json` in `data_dir`
    pub async fn load(data_dir: &Path) -> Self {
        let data_path = data_dir.join("zones.json");
        let mut registry = Self::new();

        let stored: Vec<Zone> = persistence::load_json(&data_path, "zones").await;
        for zone in stored {
            for member in &zone.members {
                registry
                    .entity_zones
                    .insert(member.entity_id.clone(), zone.id.clone());
            }
            registry.zones.insert(zone.id.clone(), zone);
        }

        registry.data_path = Some(data_path);
        registry
    }

    /// Persist the registry, if it was loaded from disk
    pub async fn save(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        persistence::save_json(path, &self.zones(), "zones").await?;
        Ok(())
    }

    /// Subscribe to registry events
    #[must_use] pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Replace a zone's membership (topology change from discovery)
    ///
    /// Returns the new generation of the zone.
    pub fn refresh_zone(
        &self,
        zone_id: &str,
        name: &str,
        members: impl IntoIterator<Item = EntityRef>,
    ) -> u64 {
        let members: BTreeSet<EntityRef> = members.into_iter().collect();
        let member_count = members.len();

        // Drop reverse-index entries that pointed at the old membership
        self.entity_zones.retain(|_, zone| zone.as_str() != zone_id);
        for member in &members {
            self.entity_zones
                .insert(member.entity_id.clone(), zone_id.to_string());
        }

        let generation = {
            let mut zone = self
                .zones
                .entry(zone_id.to_string())
                .or_insert_with(|| Zone::new(zone_id, name));
            zone.name = name.to_string();
            zone.members = members;
            zone.stale = false;
            zone.generation += 1;
            zone.generation
        };

        tracing::info!(
            "Refreshed zone {} (generation {}, {} members)",
            zone_id,
            generation,
            member_count
        );

        let _ = self.event_tx.send(RegistryEvent::ZoneRefreshed {
            zone_id: zone_id.to_string(),
            generation,
        });
        generation
    }

    /// Mark a zone stale without dropping it
    pub fn mark_stale(&self, zone_id: &str) -> Result<(), RegistryError> {
        {
            let mut zone = self
                .zones
                .get_mut(zone_id)
                .ok_or_else(|| RegistryError::ZoneNotFound(zone_id.to_string()))?;
            if zone.stale {
                return Ok(());
            }
            zone.stale = true;
        }

        tracing::info!("Zone {} marked stale", zone_id);
        let _ = self.event_tx.send(RegistryEvent::ZoneStale {
            zone_id: zone_id.to_string(),
        });
        Ok(())
    }

    /// Member entities of a zone (empty for unknown zones)
    #[must_use] pub fn get_zone_members(&self, zone_id: &str) -> BTreeSet<EntityRef> {
        self.zones
            .get(zone_id)
            .map(|z| z.members.clone())
            .unwrap_or_default()
    }

    /// Consistent snapshot of one zone
    #[must_use] pub fn zone(&self, zone_id: &str) -> Option<Zone> {
        self.zones.get(zone_id).map(|z| z.value().clone())
    }

    /// Snapshot of all zones, ordered by id
    #[must_use] pub fn zones(&self) -> Vec<Zone> {
        let mut zones: Vec<Zone> = self.zones.iter().map(|r| r.value().clone()).collect();
        zones.sort_by(|a, b| a.id.cmp(&b.id));
        zones
    }

    /// All zone ids, ordered
    #[must_use] pub fn zone_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.zones.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Zone an entity belongs to
    #[must_use] pub fn zone_of_entity(&self, entity_id: &str) -> Option<String> {
        self.entity_zones.get(entity_id).map(|z| z.value().clone())
    }

    /// Number of known zones
    #[must_use] pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether no zone is known
    #[must_use] pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kitchen_members() -> Vec<EntityRef> {
        vec![
            EntityRef::new("light.kitchen_ceiling", None),
            EntityRef::new("binary_sensor.kitchen_motion", Some("motion")),
        ]
    }

    #[test]
    fn test_refresh_bumps_generation_and_indexes_entities() {
        let registry = ZoneRegistry::new();
        assert_eq!(registry.refresh_zone("kitchen", "Kitchen", kitchen_members()), 1);
        assert_eq!(registry.refresh_zone("kitchen", "Kitchen", kitchen_members()), 2);
        assert_eq!(
            registry.zone_of_entity("light.kitchen_ceiling").as_deref(),
            Some("kitchen")
        );
    }

    #[test]
    fn test_refresh_drops_removed_members_from_index() {
        let registry = ZoneRegistry::new();
        registry.refresh_zone("kitchen", "Kitchen", kitchen_members());
        registry.refresh_zone(
            "kitchen",
            "Kitchen",
            vec![EntityRef::new("light.kitchen_ceiling", None)],
        );
        assert!(registry.zone_of_entity("binary_sensor.kitchen_motion").is_none());
        assert_eq!(registry.get_zone_members("kitchen").len(), 1);
    }

    #[test]
    fn test_unknown_zone_has_no_members() {
        let registry = ZoneRegistry::new();
        assert!(registry.get_zone_members("attic").is_empty());
        assert!(matches!(
            registry.mark_stale("attic"),
            Err(RegistryError::ZoneNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_zone_is_kept_and_announced() {
        let registry = ZoneRegistry::new();
        registry.refresh_zone("kitchen", "Kitchen", kitchen_members());
        let mut rx = registry.subscribe();

        registry.mark_stale("kitchen").unwrap();

        assert!(registry.zone("kitchen").unwrap().stale);
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::ZoneStale {
                zone_id: "kitchen".to_string()
            }
        );
    }

    #[test]
    fn test_presence_detection_helpers() {
        let zone = Zone::new("den", "Den")
            .with_member(EntityRef::new("media_player.den_tv", None))
            .with_member(EntityRef::new("light.den_lamp", None));
        assert!(zone.has_light());
        assert!(zone.has_presence_detection());
        assert!(!zone.has("binary_sensor", Some("motion")));
    }

    #[tokio::test]
    async fn test_load_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ZoneRegistry::load(dir.path()).await;
        assert!(registry.is_empty());
        registry.refresh_zone("kitchen", "Kitchen", kitchen_members());
        registry.save().await.unwrap();

        let reloaded = ZoneRegistry::load(dir.path()).await;
        assert_eq!(reloaded.zone_ids(), vec!["kitchen".to_string()]);
        assert_eq!(
            reloaded.zone_of_entity("binary_sensor.kitchen_motion").as_deref(),
            Some("kitchen")
        );
    }
}
