//! Race-start grace windows.
//!
//! When a race (and optionally qualifying) begins, every car on the grid is ghosted
//! for its own random window so the first corners are not decided by pile-ups. Cars
//! that join after the start get what is left of the grace period; nobody keeps a
//! window past `start + max`.

use noclip_types::{EntityId, Reason, SessionChange, SessionType};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::{
    table::{lock, EntityTable},
    timer::{is_current, Timer, MAX_DELAY},
    Coordinator,
};

pub const DEFAULT_MIN: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX: Duration = Duration::from_secs(70);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraceConfig {
    pub enabled: bool,
    /// Also grant windows at the start of qualifying.
    pub include_qualifying: bool,
    pub min: Duration,
    pub max: Duration,
    /// Fixed seed for the window draw; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_qualifying: false,
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            seed: None,
        }
    }
}

impl GraceConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max.is_zero() {
            return Err("max must be greater than zero");
        }
        if self.min > self.max {
            return Err("min must not exceed max");
        }
        if self.max > MAX_DELAY {
            return Err("max must not exceed one day");
        }
        Ok(())
    }

    /// Whether a session of this kind opens with grace windows.
    pub fn applies_to(&self, session: SessionType) -> bool {
        self.enabled
            && match session {
                SessionType::Race => true,
                SessionType::Qualifying => self.include_qualifying,
                SessionType::Booking | SessionType::Practice => false,
            }
    }
}

/// Bounds of the window a car gets `elapsed` after the start, or `None` once the
/// grace period is over.
pub fn window_bounds(
    min: Duration,
    max: Duration,
    elapsed: Duration,
) -> Option<(Duration, Duration)> {
    let remaining = max.saturating_sub(elapsed);
    if remaining.is_zero() {
        return None;
    }
    Some((min.min(remaining), remaining))
}

fn draw(rng: &mut StdRng, low: Duration, high: Duration) -> Duration {
    let low = low.as_millis() as u64;
    let high = high.as_millis() as u64;
    Duration::from_millis(rng.gen_range(low..=high.max(low)))
}

struct Session {
    kind: SessionType,
    start: Instant,
    start_timer: Option<Timer>,
    started: bool,
}

/// A connected car and the window it holds, if any.
#[derive(Debug, Default)]
struct Member {
    window: Option<Timer>,
}

struct Inner {
    config: GraceConfig,
    coordinator: Arc<Coordinator>,
    rng: Mutex<StdRng>,
    session: Mutex<Option<Session>>,
    members: EntityTable<Member>,
}

/// Grants and expires `race_start` requests.
///
/// Only cars announced through [RaceStartGrace::connect] and not yet
/// disconnected receive windows. Lock order is session, then member, then
/// coordinator record.
#[derive(Clone)]
pub struct RaceStartGrace {
    inner: Arc<Inner>,
}

impl RaceStartGrace {
    pub fn new(config: GraceConfig, coordinator: Arc<Coordinator>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                coordinator,
                rng: Mutex::new(rng),
                session: Mutex::new(None),
                members: EntityTable::new(),
            }),
        }
    }

    /// Arm the start action if the session opens with grace windows.
    pub fn begin_session(&self, change: &SessionChange) {
        self.inner.begin_session(change);
    }

    /// Cancel the pending start and every window, releasing `race_start` everywhere.
    pub fn end_session(&self) {
        self.inner.end_session();
    }

    /// Track a (re)connected car; a car joining a running race gets what is left of
    /// the grace period.
    pub fn connect(&self, entity: EntityId) {
        self.inner.connect(entity);
    }

    /// Forget the car, cancelling its window. A start that fires afterwards skips it.
    pub fn disconnect(&self, entity: EntityId) {
        let _session = lock(&self.inner.session);
        let Some(member) = self.inner.members.remove(entity) else {
            return;
        };
        if member.window.is_some() {
            debug!(%entity, "grace window dropped on disconnect");
        }
    }

    /// Time left on the car's window, if it holds one.
    pub fn window_remaining(&self, entity: EntityId) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .members
            .with(entity, |member| member.window.as_ref().map(|timer| timer.remaining(now)))
            .flatten()
    }

    /// Whether a grace-enabled session is active and its start has passed.
    pub fn started(&self) -> bool {
        lock(&self.inner.session)
            .as_ref()
            .is_some_and(|session| session.started)
    }
}

impl Inner {
    fn begin_session(self: &Arc<Self>, change: &SessionChange) {
        if !self.config.applies_to(change.next) {
            trace!(session = change.next.as_str(), "no grace windows for session");
            return;
        }

        // Held across the spawn so an immediate start sees the new session.
        let mut session = lock(&self.session);
        let start = Instant::now() + change.starts_in().min(MAX_DELAY);
        let weak: Weak<Self> = Arc::downgrade(self);
        let start_timer = Timer::at(start, move |generation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_start(generation);
            }
        });
        *session = Some(Session {
            kind: change.next,
            start,
            start_timer: Some(start_timer),
            started: false,
        });
        debug!(
            session = change.next.as_str(),
            starts_in_ms = change.starts_in_ms,
            "grace start armed"
        );
    }

    fn end_session(&self) {
        let mut session = lock(&self.session);
        let previous = session.take();
        let mut windows = 0;
        self.members.for_each(|_, member| {
            if member.window.take().is_some() {
                windows += 1;
            }
        });
        let cleared = self.coordinator.clear_reason_everywhere(Reason::RaceStart);
        drop(session);

        if let Some(previous) = previous {
            debug!(
                session = previous.kind.as_str(),
                windows,
                cleared,
                "grace session ended"
            );
        }
    }

    fn on_start(self: &Arc<Self>, generation: u64) {
        let mut guard = lock(&self.session);
        let Some(session) = guard.as_mut() else {
            return;
        };
        if !is_current(&session.start_timer, generation) {
            trace!(generation, "stale grace start ignored");
            return;
        }
        session.start_timer = None;
        session.started = true;
        let start = session.start;

        let now = Instant::now();
        let mut granted = 0;
        self.members.for_each(|entity, member| {
            if self.grant(entity, member, start, now) {
                granted += 1;
            }
        });
        info!(session = session.kind.as_str(), granted, "race start grace applied");
    }

    fn connect(self: &Arc<Self>, entity: EntityId) {
        let guard = lock(&self.session);
        self.members.insert(entity, Member::default());
        let Some(session) = guard.as_ref() else {
            return;
        };
        // Before the start the car is picked up by the start action.
        if !session.started {
            return;
        }
        let now = Instant::now();
        let granted = self
            .members
            .with(entity, |member| self.grant(entity, member, session.start, now))
            .unwrap_or(false);
        if granted {
            debug!(%entity, "late joiner granted grace window");
        }
    }

    /// Draw and install a window for `entity`. Caller holds the session lock.
    fn grant(
        self: &Arc<Self>,
        entity: EntityId,
        member: &mut Member,
        start: Instant,
        now: Instant,
    ) -> bool {
        let elapsed = now.saturating_duration_since(start);
        let Some((low, high)) = window_bounds(self.config.min, self.config.max, elapsed) else {
            trace!(%entity, elapsed_ms = elapsed.as_millis() as u64, "grace period over");
            return false;
        };
        let length = draw(&mut lock(&self.rng), low, high);
        let ends_at = now + length;

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = Timer::at(ends_at, move |generation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_expired(entity, generation);
            }
        });
        member.window = Some(timer);
        self.coordinator.request(entity, Reason::RaceStart);
        self.coordinator.metrics().grace_windows_granted.inc();
        debug!(%entity, window_ms = length.as_millis() as u64, "grace window granted");
        true
    }

    fn on_expired(&self, entity: EntityId, generation: u64) {
        let _session = lock(&self.session);
        let expired = self
            .members
            .with(entity, |member| {
                if !is_current(&member.window, generation) {
                    return false;
                }
                member.window = None;
                self.coordinator.clear(entity, Reason::RaceStart);
                true
            })
            .unwrap_or(false);
        if expired {
            debug!(%entity, "grace window expired");
        } else {
            trace!(%entity, generation, "stale grace expiry ignored");
        }
    }
}
