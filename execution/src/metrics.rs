//! Counters for the arbitration core.
//!
//! The handles are cheap clones over shared atomics; [Metrics::register] hands
//! clones to a registry owned by whoever serves them.

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub capability_writes: Counter<u64, AtomicU64>,
    pub penalties_applied: Counter<u64, AtomicU64>,
    pub penalty_decays: Counter<u64, AtomicU64>,
    pub grace_windows_granted: Counter<u64, AtomicU64>,
    pub entities: Gauge,
}

impl Metrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "capability_writes",
            "Collision capability writes sent to the host.",
            self.capability_writes.clone(),
        );
        registry.register(
            "penalties_applied",
            "Contacts that escalated a penalty stack.",
            self.penalties_applied.clone(),
        );
        registry.register(
            "penalty_decays",
            "Penalty stack levels removed by decay.",
            self.penalty_decays.clone(),
        );
        registry.register(
            "grace_windows_granted",
            "Race-start grace windows granted.",
            self.grace_windows_granted.clone(),
        );
        registry.register(
            "entities",
            "Entities currently registered.",
            self.entities.clone(),
        );
    }
}
