//! In-memory host used by tests (and by downstream crates with the `mocks` feature).

use crate::{table::lock, Host, Notifier};
use noclip_types::EntityId;
use std::{collections::HashMap, sync::Mutex};

/// Records every capability write and chat message it receives.
#[derive(Debug, Default)]
pub struct MemoryHost {
    states: Mutex<HashMap<EntityId, bool>>,
    writes: Mutex<Vec<(EntityId, bool)>>,
    messages: Mutex<Vec<(EntityId, String)>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the host-side state without recording a write, as if something
    /// outside the coordinator had touched the car.
    pub fn force_state(&self, entity: EntityId, enabled: bool) {
        lock(&self.states).insert(entity, enabled);
    }

    pub fn state(&self, entity: EntityId) -> Option<bool> {
        lock(&self.states).get(&entity).copied()
    }

    pub fn writes(&self) -> Vec<(EntityId, bool)> {
        lock(&self.writes).clone()
    }

    pub fn writes_for(&self, entity: EntityId) -> Vec<bool> {
        lock(&self.writes)
            .iter()
            .filter(|(target, _)| *target == entity)
            .map(|(_, enabled)| *enabled)
            .collect()
    }

    pub fn messages_for(&self, entity: EntityId) -> Vec<String> {
        lock(&self.messages)
            .iter()
            .filter(|(target, _)| *target == entity)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl Host for MemoryHost {
    fn set_collision_enabled(&self, entity: EntityId, enabled: bool) {
        lock(&self.states).insert(entity, enabled);
        lock(&self.writes).push((entity, enabled));
    }

    fn collision_enabled(&self, entity: EntityId) -> Option<bool> {
        self.state(entity)
    }
}

impl Notifier for MemoryHost {
    fn send_message(&self, entity: EntityId, text: &str) {
        lock(&self.messages).push((entity, text.to_string()));
    }
}
