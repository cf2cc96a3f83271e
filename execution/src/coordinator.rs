//! Reason-set arbitration of the collision capability.
//!
//! Each feature holds collisions off for an entity by adding its own [Reason]; the
//! capability is disabled exactly while at least one reason is held. The
//! coordinator is the only writer of the host capability and writes it only on an
//! empty/non-empty transition (or to repair a host that drifted), so downstream
//! broadcasts are never redundant.
//!
//! Nothing here can fail: unknown entities, duplicate requests and clears of absent
//! reasons are no-ops.

use noclip_types::{EntityId, Reason};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, trace};

use crate::{metrics::Metrics, table::EntityTable, Host};

#[derive(Debug)]
struct Record {
    reasons: BTreeSet<Reason>,
    collisions_enabled: bool,
}

/// Diagnostic view of one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub entity: EntityId,
    pub reasons: Vec<Reason>,
    pub collisions_enabled: bool,
}

pub struct Coordinator {
    host: Arc<dyn Host>,
    records: EntityTable<Record>,
    metrics: Metrics,
}

impl Coordinator {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            records: EntityTable::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Start tracking a connected entity with an empty reason set.
    ///
    /// A reconnect replaces the previous record. The capability is written only if
    /// the host does not already report collisions enabled.
    pub fn register(&self, entity: EntityId) {
        let collisions_enabled = self.host.collision_enabled(entity).unwrap_or(true);
        let replaced = self.records.insert(
            entity,
            Record {
                reasons: BTreeSet::new(),
                collisions_enabled,
            },
        );
        if replaced.is_none() {
            self.metrics.entities.inc();
        }
        self.records.with(entity, |record| self.apply(entity, record));
        debug!(%entity, "entity registered");
    }

    /// Stop tracking an entity, restoring collisions first.
    pub fn unregister(&self, entity: EntityId) {
        let Some(mut record) = self.records.remove(entity) else {
            return;
        };
        self.restore(entity, &mut record);
        self.metrics.entities.dec();
        debug!(%entity, "entity unregistered");
    }

    /// Hold collisions off for `reason`. Returns whether the reason was newly added.
    pub fn request(&self, entity: EntityId, reason: Reason) -> bool {
        self.records
            .with(entity, |record| {
                if !record.reasons.insert(reason) {
                    trace!(%entity, %reason, "reason already active");
                    return false;
                }
                debug!(%entity, %reason, active = record.reasons.len(), "reason requested");
                self.apply(entity, record);
                true
            })
            .unwrap_or(false)
    }

    /// Release `reason`. Returns whether the reason was present.
    pub fn clear(&self, entity: EntityId, reason: Reason) -> bool {
        self.records
            .with(entity, |record| {
                if !record.reasons.remove(&reason) {
                    trace!(%entity, %reason, "reason not active");
                    return false;
                }
                debug!(%entity, %reason, active = record.reasons.len(), "reason cleared");
                self.apply(entity, record);
                true
            })
            .unwrap_or(false)
    }

    /// Release every reason for the entity and make sure collisions are back on.
    pub fn clear_all(&self, entity: EntityId) {
        self.records.with(entity, |record| self.restore(entity, record));
    }

    /// Release `reason` on every entity. Returns how many entities held it.
    pub fn clear_reason_everywhere(&self, reason: Reason) -> usize {
        let mut cleared = 0;
        self.records.for_each(|entity, record| {
            if record.reasons.remove(&reason) {
                cleared += 1;
                self.apply(entity, record);
            }
        });
        if cleared > 0 {
            debug!(%reason, cleared, "reason cleared on all entities");
        }
        cleared
    }

    /// Session safety net: release every reason on every entity.
    pub fn reset(&self) {
        self.records.for_each(|entity, record| self.restore(entity, record));
        debug!(entities = self.records.len(), "coordinator reset");
    }

    pub fn active_reasons(&self, entity: EntityId) -> BTreeSet<Reason> {
        self.records
            .with(entity, |record| record.reasons.clone())
            .unwrap_or_default()
    }

    /// The capability as last written, or `None` for unknown entities.
    pub fn collisions_enabled(&self, entity: EntityId) -> Option<bool> {
        self.records.with(entity, |record| record.collisions_enabled)
    }

    pub fn is_registered(&self, entity: EntityId) -> bool {
        self.records.contains(entity)
    }

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        let mut snapshot = Vec::with_capacity(self.records.len());
        self.records.for_each(|entity, record| {
            snapshot.push(EntitySnapshot {
                entity,
                reasons: record.reasons.iter().copied().collect(),
                collisions_enabled: record.collisions_enabled,
            });
        });
        snapshot
    }

    /// Bring the capability in line with the reason set, writing only on change.
    fn apply(&self, entity: EntityId, record: &mut Record) {
        let desired = record.reasons.is_empty();
        if record.collisions_enabled == desired {
            return;
        }
        self.host.set_collision_enabled(entity, desired);
        self.metrics.capability_writes.inc();
        record.collisions_enabled = desired;
        debug!(%entity, enabled = desired, "collision capability written");
    }

    fn restore(&self, entity: EntityId, record: &mut Record) {
        record.reasons.clear();
        let host_disabled = self.host.collision_enabled(entity) == Some(false);
        if record.collisions_enabled && !host_disabled {
            return;
        }
        self.host.set_collision_enabled(entity, true);
        self.metrics.capability_writes.inc();
        record.collisions_enabled = true;
        debug!(%entity, host_disabled, "collision capability restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryHost;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const CAR: EntityId = EntityId(1);
    const OTHER: EntityId = EntityId(2);

    fn setup() -> (Arc<MemoryHost>, Coordinator) {
        let host = Arc::new(MemoryHost::new());
        let coordinator = Coordinator::new(host.clone());
        coordinator.register(CAR);
        coordinator.register(OTHER);
        (host, coordinator)
    }

    #[test]
    fn test_register_writes_nothing_when_host_agrees() {
        let host = Arc::new(MemoryHost::new());
        host.force_state(CAR, true);
        let coordinator = Coordinator::new(host.clone());
        coordinator.register(CAR);
        assert!(host.writes().is_empty());
        assert_eq!(coordinator.collisions_enabled(CAR), Some(true));
    }

    #[test]
    fn test_register_repairs_host_left_disabled() {
        let host = Arc::new(MemoryHost::new());
        host.force_state(CAR, false);
        let coordinator = Coordinator::new(host.clone());
        coordinator.register(CAR);
        assert_eq!(host.writes_for(CAR), vec![true]);
    }

    #[test]
    fn test_request_disables_once() {
        let (host, coordinator) = setup();

        assert!(coordinator.request(CAR, Reason::Penalty));
        assert!(!coordinator.request(CAR, Reason::Penalty));

        assert_eq!(host.writes_for(CAR), vec![false]);
        assert_eq!(
            coordinator.active_reasons(CAR),
            BTreeSet::from([Reason::Penalty])
        );
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::OffTrack);

        assert!(coordinator.clear(CAR, Reason::OffTrack));
        assert!(!coordinator.clear(CAR, Reason::OffTrack));
        assert!(!coordinator.clear(CAR, Reason::Penalty));

        assert_eq!(host.writes_for(CAR), vec![false, true]);
        assert!(coordinator.active_reasons(CAR).is_empty());
    }

    #[test]
    fn test_reasons_are_independent() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::RaceStart);
        coordinator.request(CAR, Reason::Penalty);

        coordinator.clear(CAR, Reason::RaceStart);
        assert_eq!(coordinator.collisions_enabled(CAR), Some(false));
        assert_eq!(host.writes_for(CAR), vec![false]);

        coordinator.clear(CAR, Reason::Penalty);
        assert_eq!(coordinator.collisions_enabled(CAR), Some(true));
        assert_eq!(host.writes_for(CAR), vec![false, true]);
    }

    #[test]
    fn test_entities_do_not_interfere() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::Penalty);
        assert_eq!(coordinator.collisions_enabled(OTHER), Some(true));
        assert!(host.writes_for(OTHER).is_empty());
    }

    #[test]
    fn test_unknown_entity_is_noop() {
        let (host, coordinator) = setup();
        let ghost = EntityId(99);
        assert!(!coordinator.request(ghost, Reason::Penalty));
        assert!(!coordinator.clear(ghost, Reason::Penalty));
        coordinator.clear_all(ghost);
        assert!(coordinator.active_reasons(ghost).is_empty());
        assert_eq!(coordinator.collisions_enabled(ghost), None);
        assert!(host.writes().is_empty());
    }

    #[test]
    fn test_clear_all_repairs_drifted_host() {
        let (host, coordinator) = setup();
        host.force_state(CAR, false);

        coordinator.clear_all(CAR);

        assert_eq!(host.writes_for(CAR), vec![true]);
        assert_eq!(host.state(CAR), Some(true));
    }

    #[test]
    fn test_unregister_restores_and_forgets() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::Penalty);
        coordinator.unregister(CAR);

        assert_eq!(host.writes_for(CAR), vec![false, true]);
        assert!(!coordinator.is_registered(CAR));
        assert!(!coordinator.request(CAR, Reason::Penalty));
        assert_eq!(host.writes_for(CAR), vec![false, true]);
    }

    #[test]
    fn test_clear_reason_everywhere_leaves_other_reasons() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::OffTrack);
        coordinator.request(OTHER, Reason::OffTrack);
        coordinator.request(OTHER, Reason::Penalty);

        assert_eq!(coordinator.clear_reason_everywhere(Reason::OffTrack), 2);

        assert_eq!(coordinator.collisions_enabled(CAR), Some(true));
        assert_eq!(coordinator.collisions_enabled(OTHER), Some(false));
        assert_eq!(host.writes_for(OTHER), vec![false]);
    }

    #[test]
    fn test_reset_empties_every_set() {
        let (_host, coordinator) = setup();
        coordinator.request(CAR, Reason::RaceStart);
        coordinator.request(OTHER, Reason::Penalty);

        coordinator.reset();

        for snapshot in coordinator.snapshot() {
            assert!(snapshot.reasons.is_empty());
            assert!(snapshot.collisions_enabled);
        }
    }

    #[test]
    fn test_metrics_count_writes_and_entities() {
        let (host, coordinator) = setup();
        coordinator.request(CAR, Reason::Penalty);
        coordinator.request(CAR, Reason::OffTrack);
        coordinator.clear_all(CAR);
        coordinator.register(CAR);
        coordinator.unregister(OTHER);

        let metrics = coordinator.metrics();
        assert_eq!(metrics.capability_writes.get(), host.writes().len() as u64);
        assert_eq!(metrics.capability_writes.get(), 2);
        assert_eq!(metrics.entities.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_keep_capability_consistent() {
        let host = Arc::new(MemoryHost::new());
        let coordinator = Arc::new(Coordinator::new(host.clone()));
        for id in 0..3 {
            coordinator.register(EntityId(id));
        }

        let mut tasks = Vec::new();
        for seed in 0..8u64 {
            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                for step in 0..500 {
                    let entity = EntityId(rng.gen_range(0..3));
                    let reason = Reason::ALL[rng.gen_range(0..Reason::ALL.len())];
                    match rng.gen_range(0..10) {
                        0..=4 => {
                            coordinator.request(entity, reason);
                        }
                        5..=7 => {
                            coordinator.clear(entity, reason);
                        }
                        8 => coordinator.clear_all(entity),
                        _ => {
                            coordinator.clear_reason_everywhere(reason);
                        }
                    }
                    if step % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for id in 0..3 {
            let entity = EntityId(id);
            let enabled = coordinator.active_reasons(entity).is_empty();
            assert_eq!(coordinator.collisions_enabled(entity), Some(enabled));
            assert_eq!(host.state(entity).unwrap_or(true), enabled);

            let writes = host.writes_for(entity);
            assert!(writes.windows(2).all(|pair| pair[0] != pair[1]));
            if let Some(first) = writes.first() {
                assert!(!first);
            }
        }
    }

    #[derive(Clone, Debug)]
    enum Op {
        Request(u32, Reason),
        Clear(u32, Reason),
        ClearAll(u32),
        ClearEverywhere(Reason),
    }

    fn reason() -> impl Strategy<Value = Reason> {
        prop::sample::select(Reason::ALL.to_vec())
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..3, reason()).prop_map(|(id, reason)| Op::Request(id, reason)),
            (0u32..3, reason()).prop_map(|(id, reason)| Op::Clear(id, reason)),
            (0u32..3).prop_map(Op::ClearAll),
            reason().prop_map(Op::ClearEverywhere),
        ]
    }

    proptest! {
        #[test]
        fn test_capability_tracks_reason_set(ops in prop::collection::vec(op(), 1..64)) {
            let host = Arc::new(MemoryHost::new());
            let coordinator = Coordinator::new(host.clone());
            for id in 0..3 {
                coordinator.register(EntityId(id));
            }

            for op in ops {
                match op {
                    Op::Request(id, reason) => { coordinator.request(EntityId(id), reason); }
                    Op::Clear(id, reason) => { coordinator.clear(EntityId(id), reason); }
                    Op::ClearAll(id) => coordinator.clear_all(EntityId(id)),
                    Op::ClearEverywhere(reason) => { coordinator.clear_reason_everywhere(reason); }
                }
                for id in 0..3 {
                    let entity = EntityId(id);
                    let disabled = !coordinator.active_reasons(entity).is_empty();
                    prop_assert_eq!(host.state(entity).unwrap_or(true), !disabled);
                }
            }

            // Writes for an entity always alternate: no write repeats the last value.
            for id in 0..3 {
                let writes = host.writes_for(EntityId(id));
                prop_assert!(writes.windows(2).all(|pair| pair[0] != pair[1]));
                if let Some(first) = writes.first() {
                    prop_assert!(!first);
                }
            }
        }
    }
}
