//! Event dispatch.
//!
//! The [Arbiter] owns the coordinator and every feature, and routes each host
//! event to them in a fixed order: on connect the coordinator learns about the car
//! before any feature can request on it; on disconnect the features drop their
//! timers before the coordinator restores collisions and forgets the car.
//!
//! A session change is exclusive: it holds the session gate for writing while every
//! other event holds it for reading, so no contact, report or connection lands
//! halfway through a reset. Timer callbacks do not take the gate.

use noclip_types::{EntityId, Event, Reason, SessionChange};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::{
    display::{format_tag, TagStyle},
    grace::{GraceConfig, RaceStartGrace},
    off_track::{OffTrackConfig, OffTrackMonitor},
    metrics::Metrics,
    penalty::{PenaltyConfig, PenaltyTracker},
    table::{read, write},
    Coordinator, Host, Notifier,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArbiterConfig {
    pub penalty: PenaltyConfig,
    pub race_start: GraceConfig,
    pub off_track: OffTrackConfig,
}

impl ArbiterConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.penalty.validate()?;
        self.race_start.validate()
    }
}

/// Diagnostic view of one car across every component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityStatus {
    pub entity: EntityId,
    pub reasons: Vec<Reason>,
    pub collisions_enabled: bool,
    pub stack: u8,
    pub penalty_remaining_secs: u64,
    pub grace_remaining_secs: Option<u64>,
    pub tag: String,
}

pub struct Arbiter {
    session_gate: RwLock<()>,
    coordinator: Arc<Coordinator>,
    penalty: PenaltyTracker,
    grace: RaceStartGrace,
    off_track: OffTrackMonitor,
}

impl Arbiter {
    /// Must be called within a tokio runtime once events start flowing, since the
    /// features schedule timers.
    pub fn new(config: ArbiterConfig, host: Arc<dyn Host>, notifier: Arc<dyn Notifier>) -> Self {
        let coordinator = Arc::new(Coordinator::new(host));
        Self {
            session_gate: RwLock::new(()),
            penalty: PenaltyTracker::new(config.penalty, coordinator.clone(), notifier),
            grace: RaceStartGrace::new(config.race_start, coordinator.clone()),
            off_track: OffTrackMonitor::new(config.off_track, coordinator.clone()),
            coordinator,
        }
    }

    pub fn handle(&self, event: &Event) {
        if let Event::Session(change) = event {
            let _gate = write(&self.session_gate);
            self.session_changed(change);
            return;
        }

        let _gate = read(&self.session_gate);
        match event {
            Event::Connect(connect) => self.connect(connect.entity),
            Event::Disconnect(disconnect) => self.disconnect(disconnect.entity),
            Event::Session(_) => {}
            Event::Collision(violation) => self.penalty.on_violation(violation),
            Event::OffTrack(report) => {
                self.off_track.on_report(report);
            }
        }
    }

    fn connect(&self, entity: EntityId) {
        self.coordinator.register(entity);
        self.penalty.connect(entity);
        self.grace.connect(entity);
        info!(%entity, "car connected");
    }

    fn disconnect(&self, entity: EntityId) {
        self.grace.disconnect(entity);
        self.penalty.disconnect(entity);
        self.coordinator.unregister(entity);
        info!(%entity, "car disconnected");
    }

    /// Caller holds the session gate for writing.
    fn session_changed(&self, change: &SessionChange) {
        // The safety net runs first; each feature then clears its own reason under
        // its own entry lock, so state and reasons agree when the reset is done.
        self.coordinator.reset();
        self.penalty.reset_all();
        self.off_track.on_session_change();
        self.grace.end_session();
        self.grace.begin_session(change);
        info!(
            previous = change.previous.map(|session| session.as_str()),
            next = change.next.as_str(),
            starts_in_ms = change.starts_in_ms,
            "session changed"
        );
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn penalty(&self) -> &PenaltyTracker {
        &self.penalty
    }

    pub fn metrics(&self) -> &Metrics {
        self.coordinator.metrics()
    }

    /// Per-car diagnostics, in entity order.
    pub fn status(&self, style: TagStyle) -> Vec<EntityStatus> {
        let statuses: Vec<EntityStatus> = self
            .coordinator
            .snapshot()
            .into_iter()
            .map(|snapshot| {
                let standing = self.penalty.standing(snapshot.entity);
                let stack = standing.map(|standing| standing.stack).unwrap_or(0);
                let penalty_remaining_secs = standing
                    .map(|standing| ceil_secs(standing.remaining))
                    .unwrap_or(0);
                let grace_remaining = self.grace.window_remaining(snapshot.entity);
                EntityStatus {
                    entity: snapshot.entity,
                    reasons: snapshot.reasons,
                    collisions_enabled: snapshot.collisions_enabled,
                    stack,
                    penalty_remaining_secs,
                    grace_remaining_secs: grace_remaining.map(ceil_secs),
                    tag: format_tag(style, stack, penalty_remaining_secs),
                }
            })
            .collect();
        debug!(entities = statuses.len(), "status snapshot taken");
        statuses
    }
}

fn ceil_secs(duration: std::time::Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
