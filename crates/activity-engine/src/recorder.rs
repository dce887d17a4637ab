//! Light learning recorder
//!
//! Captures manual light changes together with what the zone was doing at
//! the time. Changes the engine caused itself are recognised by their
//! context and ignored.

use crate::collaborator::{EnvironmentProvider, SyncSink};
use crate::model::{
    ActionType, ActivityLevel, EnvironmentContext, LightAction, LightAttributes, LightStateChange,
};
use crate::origin::OriginTracker;
use crate::tracker::ActivityTracker;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use zone_core::{PresenceBoard, ZoneRegistry};

/// Default number of actions kept while the sync endpoint is down
pub const DEFAULT_SYNC_BUFFER_CAPACITY: usize = 256;

/// Kind of change between two light states
///
/// Turning off wins, then turning on from off (or unknown), then color,
/// color temperature and brightness, in that order. An attribute only counts
/// when the new state carries a value for it.
#[must_use] pub fn classify(old: Option<&LightAttributes>, new: &LightAttributes) -> ActionType {
    fn set_to<T: PartialEq>(old: &Option<T>, new: &Option<T>) -> bool {
        new.is_some() && old != new
    }

    if !new.is_on() {
        return ActionType::TurnOff;
    }
    let Some(old) = old.filter(|old| old.is_on()) else {
        return ActionType::TurnOn;
    };

    if set_to(&old.rgb_color, &new.rgb_color) || set_to(&old.hs_color, &new.hs_color) {
        ActionType::Color
    } else if set_to(&old.color_temp, &new.color_temp) {
        ActionType::ColorTemp
    } else if set_to(&old.brightness, &new.brightness) {
        ActionType::Brightness
    } else {
        ActionType::TurnOn
    }
}

/// Captures manual light changes and ships them to the sync endpoint
pub struct LightLearningRecorder {
    registry: Arc<ZoneRegistry>,
    tracker: Arc<ActivityTracker>,
    origins: Arc<OriginTracker>,
    board: Arc<PresenceBoard>,
    buffer: Mutex<VecDeque<LightAction>>,
    capacity: usize,
}

impl LightLearningRecorder {
    #[must_use] pub fn new(
        registry: Arc<ZoneRegistry>,
        tracker: Arc<ActivityTracker>,
        origins: Arc<OriginTracker>,
        board: Arc<PresenceBoard>,
        capacity: usize,
    ) -> Self {
        Self {
            registry,
            tracker,
            origins,
            board,
            buffer: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Build the learning record for a light change
    ///
    /// Returns `None` for engine-originated changes, lights outside any
    /// zone and updates that changed nothing.
    pub fn capture(
        &self,
        change: &LightStateChange,
        environment: &dyn EnvironmentProvider,
    ) -> Option<LightAction> {
        if self.origins.is_own(&change.context) {
            tracing::debug!("Ignoring engine-originated change of {}", change.entity_id);
            return None;
        }

        let Some(zone_id) = self.registry.zone_of_entity(&change.entity_id) else {
            tracing::debug!("Light {} is not in any zone, not recording", change.entity_id);
            return None;
        };

        if change.old.as_ref() == Some(&change.new) {
            return None;
        }

        let action_type = classify(change.old.as_ref(), &change.new);
        let activity = self.tracker.level(&zone_id);
        let duration = self.tracker.duration(&zone_id, change.timestamp);
        let snapshot = self.board.latest(&zone_id);

        let presence_detected = snapshot
            .as_ref()
            .map_or(activity != ActivityLevel::None, |s| s.is_present());
        let illuminance = snapshot
            .and_then(|s| s.luminosity)
            .or_else(|| environment.illuminance(&zone_id));

        let action = LightAction {
            entity_id: change.entity_id.clone(),
            zone_id,
            action_type,
            timestamp: change.timestamp,
            activity,
            activity_duration: (duration * 10.0).round() / 10.0,
            previous: change.old.as_ref().map(LightAttributes::recorded),
            resulting: change.new.recorded(),
            presence_detected,
            environment: EnvironmentContext::at(
                change.timestamp,
                illuminance,
                environment.sun_elevation(),
            ),
            context_id: change.context.id.clone(),
        };

        tracing::info!(
            "Captured {:?} of {} in zone {} ({}, {:.1}s)",
            action.action_type,
            action.entity_id,
            action.zone_id,
            action.activity,
            action.activity_duration
        );
        Some(action)
    }

    /// Send an action, buffering it when the endpoint is unavailable
    ///
    /// Returns whether the action was delivered.
    pub async fn dispatch(&self, action: LightAction, sink: &dyn SyncSink) -> bool {
        match sink.send_light_action(&action).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to sync light action for {}: {}", action.entity_id, e);
                self.buffer_action(action).await;
                false
            }
        }
    }

    /// Retry buffered actions in order; stops at the first failure
    ///
    /// Returns the number of actions delivered.
    pub async fn flush(&self, sink: &dyn SyncSink) -> usize {
        let mut sent = 0;
        loop {
            let Some(action) = self.buffer.lock().await.pop_front() else {
                break;
            };
            if let Err(e) = sink.send_light_action(&action).await {
                let kept = {
                    let mut buffer = self.buffer.lock().await;
                    buffer.push_front(action);
                    buffer.len()
                };
                tracing::warn!("Sync still unavailable, {} actions kept: {}", kept, e);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            tracing::info!("Flushed {} buffered light actions", sent);
        }
        sent
    }

    /// Number of actions waiting for the sync endpoint
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    async fn buffer_action(&self, action: LightAction) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.capacity {
            if let Some(dropped) = buffer.pop_front() {
                tracing::warn!(
                    "Sync buffer full, dropping action for {} from {}",
                    dropped.entity_id,
                    dropped.timestamp
                );
            }
        }
        buffer.push_back(action);
    }
}
