//! Host side of the plugin connection.
//!
//! The game-server plugin applies capability writes and chat messages; [BridgeHost]
//! turns the core's calls into [OutboundEvent]s on a broadcast channel that every
//! connected plugin socket subscribes to.

use noclip_execution::{Host, Notifier};
use noclip_types::EntityId;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Frames sent to the plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    SetCollision { entity: EntityId, enabled: bool },
    Message { entity: EntityId, text: String },
}

pub struct BridgeHost {
    outbound: broadcast::Sender<OutboundEvent>,
    /// Connected cars and the last capability pushed to the plugin for each.
    states: Mutex<HashMap<EntityId, bool>>,
}

impl BridgeHost {
    pub fn new(buffer: usize) -> Self {
        let (outbound, _) = broadcast::channel(buffer.max(1));
        Self {
            outbound,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.outbound.subscribe()
    }

    /// Start tracking a car that joined. Cars join with collisions on.
    pub fn track(&self, entity: EntityId) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity)
            .or_insert(true);
    }

    /// Drop what we know about a car that left.
    pub fn forget(&self, entity: EntityId) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entity);
    }

    pub fn connected(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn publish(&self, event: OutboundEvent) {
        if let Err(err) = self.outbound.send(event) {
            debug!(event = ?err.0, "no plugin connected, outbound frame dropped");
        }
    }
}

impl Host for BridgeHost {
    fn set_collision_enabled(&self, entity: EntityId, enabled: bool) {
        {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            if states.insert(entity, enabled) == Some(enabled) {
                trace!(%entity, enabled, "capability unchanged, not re-broadcast");
                return;
            }
        }
        self.publish(OutboundEvent::SetCollision { entity, enabled });
    }

    fn collision_enabled(&self, entity: EntityId) -> Option<bool> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity)
            .copied()
    }
}

impl Notifier for BridgeHost {
    fn send_message(&self, entity: EntityId, text: &str) {
        self.publish(OutboundEvent::Message {
            entity,
            text: text.to_string(),
        });
    }
}
