//! Per-entity records behind per-entity locks.
//!
//! The outer map is only held long enough to look up (or swap) an entity's slot, so
//! work on one car never waits on another. A slot whose record was removed stays
//! reachable through any `Arc` cloned before removal, but reads as empty: late
//! callbacks for a disconnected car find nothing and do nothing.

use noclip_types::EntityId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

type Slot<T> = Arc<Mutex<Option<T>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub struct EntityTable<T> {
    slots: RwLock<HashMap<EntityId, Slot<T>>>,
}

impl<T> Default for EntityTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntityTable<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Install a fresh record, retiring (and returning) whatever was there before.
    pub fn insert(&self, entity: EntityId, value: T) -> Option<T> {
        let previous = write(&self.slots).insert(entity, Arc::new(Mutex::new(Some(value))))?;
        let value = lock(&previous).take();
        value
    }

    /// Remove and retire the entity's record.
    pub fn remove(&self, entity: EntityId) -> Option<T> {
        let slot = write(&self.slots).remove(&entity)?;
        let value = lock(&slot).take();
        value
    }

    /// Run `f` against the entity's record while holding only that entity's lock.
    ///
    /// Returns `None` when the entity is unknown or its record was retired.
    pub fn with<R>(&self, entity: EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let slot = read(&self.slots).get(&entity).cloned()?;
        let mut guard = lock(&slot);
        let result = guard.as_mut().map(f);
        result
    }

    /// Visit every live record, one entity lock at a time, in entity order.
    pub fn for_each(&self, mut f: impl FnMut(EntityId, &mut T)) {
        let mut slots: Vec<(EntityId, Slot<T>)> = read(&self.slots)
            .iter()
            .map(|(entity, slot)| (*entity, Arc::clone(slot)))
            .collect();
        slots.sort_by_key(|(entity, _)| *entity);
        for (entity, slot) in slots {
            if let Some(value) = lock(&slot).as_mut() {
                f(entity, value);
            }
        }
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        read(&self.slots).contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_unknown_entity_is_none() {
        let table: EntityTable<u32> = EntityTable::new();
        assert_eq!(table.with(EntityId(1), |value| *value), None);
    }

    #[test]
    fn test_insert_replaces_and_returns_previous() {
        let table = EntityTable::new();
        assert_eq!(table.insert(EntityId(1), 10), None);
        assert_eq!(table.insert(EntityId(1), 20), Some(10));
        assert_eq!(table.with(EntityId(1), |value| *value), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_removed_slot_reads_as_retired() {
        let table = EntityTable::new();
        table.insert(EntityId(3), 7);
        let stale = read(&table.slots).get(&EntityId(3)).cloned().unwrap();

        assert_eq!(table.remove(EntityId(3)), Some(7));
        assert!(lock(&stale).is_none());
        assert!(!table.contains(EntityId(3)));
        assert!(table.is_empty());
        assert_eq!(table.remove(EntityId(3)), None);
    }

    #[test]
    fn test_for_each_visits_in_entity_order() {
        let table = EntityTable::new();
        for id in [5, 1, 3] {
            table.insert(EntityId(id), id * 10);
        }
        let mut seen = Vec::new();
        table.for_each(|entity, value| {
            *value += 1;
            seen.push((entity.0, *value));
        });
        assert_eq!(seen, vec![(1, 11), (3, 31), (5, 51)]);
    }
}
