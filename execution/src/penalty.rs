//! Progressive collision penalty.
//!
//! Every qualifying contact raises the car's stack level (capped at [MAX_STACK])
//! and ghosts it for the level's penalty duration. Clean driving lowers the level
//! one step at a time: each step requires the level's full decay period without a
//! new contact.
//!
//! ## Transitions
//!
//! | Event              | Effect                                                        |
//! |--------------------|---------------------------------------------------------------|
//! | contact            | ignored below `min_speed_kph` or within the debounce interval; |
//! |                    | otherwise stack+1, ghost for `durations[stack]`, restart decay |
//! | penalty timer      | release the `penalty` reason (stack unchanged)                 |
//! | decay timer        | re-check the clean period, then stack-1 and arm the next step  |
//! | session change     | cancel timers, release `penalty`, stack back to 0              |
//!
//! [PenaltyLevel] holds the pure bookkeeping and is driven with explicit
//! timestamps; [PenaltyTracker] owns one level per connected car and the timers
//! that feed it.

use noclip_types::{EntityId, Reason, Violation};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::{
    table::EntityTable,
    timer::{is_current, Timer, MAX_DELAY},
    Coordinator, Notifier,
};

/// Highest stack level; further contacts keep refreshing it.
pub const MAX_STACK: u8 = 5;

const LEVELS: usize = MAX_STACK as usize;

pub const DEFAULT_DURATIONS_SECS: [u64; LEVELS] = [10, 20, 40, 80, 160];
pub const DEFAULT_DECAYS_SECS: [u64; LEVELS] = [30, 60, 120, 240, 480];
pub const DEFAULT_MIN_SPEED_KPH: f32 = 10.0;
pub const DEFAULT_MIN_VIOLATION_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq)]
pub struct PenaltyConfig {
    pub enabled: bool,
    /// Contacts below this closing speed are ignored.
    pub min_speed_kph: f32,
    /// Contacts closer together than this count once.
    pub min_violation_interval: Duration,
    /// Ghost duration for stack levels 1..=5.
    pub durations: [Duration; LEVELS],
    /// Clean time needed to drop from level n to n-1, for n in 1..=5.
    pub decays: [Duration; LEVELS],
    /// Send chat notices on escalation, expiry and decay.
    pub notify: bool,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_speed_kph: DEFAULT_MIN_SPEED_KPH,
            min_violation_interval: DEFAULT_MIN_VIOLATION_INTERVAL,
            durations: DEFAULT_DURATIONS_SECS.map(Duration::from_secs),
            decays: DEFAULT_DECAYS_SECS.map(Duration::from_secs),
            notify: true,
        }
    }
}

impl PenaltyConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.min_speed_kph.is_finite() || self.min_speed_kph < 0.0 {
            return Err("min_speed_kph must be a non-negative number");
        }
        if self.durations.iter().any(Duration::is_zero) {
            return Err("penalty durations must be greater than zero");
        }
        if self.decays.iter().any(Duration::is_zero) {
            return Err("decay durations must be greater than zero");
        }
        let longest = self.durations.iter().chain(&self.decays).max();
        if longest.is_some_and(|longest| *longest > MAX_DELAY)
            || self.min_violation_interval > MAX_DELAY
        {
            return Err("penalty timings must not exceed one day");
        }
        Ok(())
    }

    /// Ghost duration at `stack` (zero at level 0).
    pub fn duration(&self, stack: u8) -> Duration {
        Self::lookup(&self.durations, stack)
    }

    /// Clean time needed to leave `stack` (zero at level 0).
    pub fn decay(&self, stack: u8) -> Duration {
        Self::lookup(&self.decays, stack)
    }

    /// Seconds between the end of the ghost window and the next decay step.
    pub fn decay_after_expiry(&self, stack: u8) -> Duration {
        self.decay(stack).saturating_sub(self.duration(stack))
    }

    fn lookup(table: &[Duration; LEVELS], stack: u8) -> Duration {
        match stack {
            0 => Duration::ZERO,
            level => table[usize::from(level.min(MAX_STACK)) - 1],
        }
    }
}

/// Outcome of a contact that counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Escalation {
    pub stack: u8,
    pub penalty: Duration,
    pub decay: Duration,
}

/// Pure per-car penalty bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PenaltyLevel {
    stack: u8,
    last_violation: Option<Instant>,
    last_clean: Option<Instant>,
    noclip_until: Option<Instant>,
}

impl PenaltyLevel {
    pub fn stack(&self) -> u8 {
        self.stack
    }

    pub fn noclip_until(&self) -> Option<Instant> {
        self.noclip_until
    }

    /// Apply a contact at `now`. Returns `None` when the contact is ignored, in
    /// which case nothing (timestamps included) changed.
    pub fn record_violation(
        &mut self,
        speed_kph: f32,
        now: Instant,
        config: &PenaltyConfig,
    ) -> Option<Escalation> {
        if speed_kph.is_nan() || speed_kph < config.min_speed_kph {
            return None;
        }
        if let Some(last) = self.last_violation {
            if now.saturating_duration_since(last) < config.min_violation_interval {
                return None;
            }
        }

        self.last_violation = Some(now);
        self.stack = self.stack.saturating_add(1).min(MAX_STACK);
        self.last_clean = Some(now);
        let penalty = config.duration(self.stack);
        self.noclip_until = Some(now + penalty);
        Some(Escalation {
            stack: self.stack,
            penalty,
            decay: config.decay(self.stack),
        })
    }

    /// Whether the ghost window has run out at `now`.
    pub fn penalty_expired(&self, now: Instant) -> bool {
        self.noclip_until.is_some_and(|until| now >= until)
    }

    pub fn end_penalty(&mut self) {
        self.noclip_until = None;
    }

    /// Step the level down if the car has been clean for the full decay period of
    /// its current level. Returns the new level, or `None` if nothing changed.
    pub fn try_decay(&mut self, now: Instant, config: &PenaltyConfig) -> Option<u8> {
        if self.stack == 0 {
            return None;
        }
        let last_clean = self.last_clean?;
        if now.saturating_duration_since(last_clean) < config.decay(self.stack) {
            return None;
        }
        self.stack -= 1;
        self.last_clean = Some(now);
        Some(self.stack)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A car's level plus the timers driving it.
#[derive(Debug, Default)]
struct Entry {
    level: PenaltyLevel,
    penalty_timer: Option<Timer>,
    decay_timer: Option<Timer>,
}

/// Current penalty standing of one car.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Standing {
    pub stack: u8,
    /// Time left on the active ghost window (zero when none is active).
    pub remaining: Duration,
}

enum Notice {
    Escalated(Escalation),
    Expired { stack: u8 },
    Decayed { stack: u8 },
}

struct Inner {
    config: PenaltyConfig,
    coordinator: Arc<Coordinator>,
    notifier: Arc<dyn Notifier>,
    entries: EntityTable<Entry>,
}

/// Owns the penalty state of every connected car.
#[derive(Clone)]
pub struct PenaltyTracker {
    inner: Arc<Inner>,
}

impl PenaltyTracker {
    pub fn new(
        config: PenaltyConfig,
        coordinator: Arc<Coordinator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                coordinator,
                notifier,
                entries: EntityTable::new(),
            }),
        }
    }

    /// Start a clean record for a (re)connected car.
    pub fn connect(&self, entity: EntityId) {
        self.inner.entries.insert(entity, Entry::default());
    }

    /// Forget the car; its timers are cancelled with the record.
    pub fn disconnect(&self, entity: EntityId) {
        if let Some(entry) = self.inner.entries.remove(entity) {
            debug!(%entity, stack = entry.level.stack, "penalty record dropped");
        }
    }

    pub fn on_violation(&self, violation: &Violation) {
        self.inner.on_violation(violation);
    }

    /// Session change: every car starts clean.
    pub fn reset_all(&self) {
        self.inner.reset_all();
    }

    pub fn stack(&self, entity: EntityId) -> Option<u8> {
        self.inner.entries.with(entity, |entry| entry.level.stack)
    }

    pub fn standing(&self, entity: EntityId) -> Option<Standing> {
        let now = Instant::now();
        self.inner.entries.with(entity, |entry| Standing {
            stack: entry.level.stack,
            remaining: entry
                .level
                .noclip_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default(),
        })
    }
}

impl Inner {
    fn on_violation(self: &Arc<Self>, violation: &Violation) {
        let entity = violation.entity;
        if !self.config.enabled {
            trace!(%entity, "penalties disabled, contact ignored");
            return;
        }

        let now = Instant::now();
        let escalation = self.entries.with(entity, |entry| {
            let speed = violation.relative_speed_kph;
            let escalation = entry.level.record_violation(speed, now, &self.config)?;
            entry.decay_timer = None;
            self.coordinator.request(entity, Reason::Penalty);
            entry.penalty_timer = entry
                .level
                .noclip_until
                .map(|until| self.schedule_expiry(entity, until));
            entry.decay_timer = Some(self.schedule_decay(entity, escalation.decay));
            Some(escalation)
        });

        match escalation {
            Some(Some(escalation)) => {
                self.coordinator.metrics().penalties_applied.inc();
                info!(
                    %entity,
                    speed_kph = violation.relative_speed_kph,
                    stack = escalation.stack,
                    penalty_secs = escalation.penalty.as_secs(),
                    "collision penalty applied"
                );
                self.notify(entity, Notice::Escalated(escalation));
            }
            Some(None) => trace!(
                %entity,
                speed_kph = violation.relative_speed_kph,
                "contact below threshold or debounced"
            ),
            None => trace!(%entity, "contact for untracked entity"),
        }
    }

    fn on_penalty_timer(self: &Arc<Self>, entity: EntityId, generation: u64) {
        let now = Instant::now();
        let expired = self.entries.with(entity, |entry| {
            if !is_current(&entry.penalty_timer, generation) {
                return None;
            }
            entry.penalty_timer = None;
            if !entry.level.penalty_expired(now) {
                return None;
            }
            entry.level.end_penalty();
            self.coordinator.clear(entity, Reason::Penalty);
            Some(entry.level.stack)
        });

        if let Some(Some(stack)) = expired {
            debug!(%entity, stack, "collision penalty expired");
            self.notify(entity, Notice::Expired { stack });
        } else {
            trace!(%entity, generation, "stale penalty timer ignored");
        }
    }

    fn on_decay_timer(self: &Arc<Self>, entity: EntityId, generation: u64) {
        let now = Instant::now();
        let decayed = self.entries.with(entity, |entry| {
            if !is_current(&entry.decay_timer, generation) {
                return None;
            }
            entry.decay_timer = None;
            let stack = entry.level.try_decay(now, &self.config)?;
            if stack > 0 {
                entry.decay_timer = Some(self.schedule_decay(entity, self.config.decay(stack)));
            }
            Some(stack)
        });

        if let Some(Some(stack)) = decayed {
            self.coordinator.metrics().penalty_decays.inc();
            info!(%entity, stack, "penalty level decayed");
            self.notify(entity, Notice::Decayed { stack });
        } else {
            trace!(%entity, generation, "stale decay timer ignored");
        }
    }

    fn reset_all(&self) {
        self.entries.for_each(|entity, entry| {
            entry.penalty_timer = None;
            entry.decay_timer = None;
            self.coordinator.clear(entity, Reason::Penalty);
            entry.level.reset();
        });
        debug!(entities = self.entries.len(), "penalty state reset");
    }

    fn schedule_expiry(self: &Arc<Self>, entity: EntityId, until: Instant) -> Timer {
        let weak: Weak<Self> = Arc::downgrade(self);
        Timer::at(until, move |generation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_penalty_timer(entity, generation);
            }
        })
    }

    fn schedule_decay(self: &Arc<Self>, entity: EntityId, delay: Duration) -> Timer {
        let weak: Weak<Self> = Arc::downgrade(self);
        Timer::after(delay, move |generation| {
            if let Some(inner) = weak.upgrade() {
                inner.on_decay_timer(entity, generation);
            }
        })
    }

    fn notify(&self, entity: EntityId, notice: Notice) {
        if !self.config.notify {
            return;
        }
        let text = match notice {
            Notice::Escalated(escalation) => format!(
                "Collision penalty level {}/{}: collisions disabled for {}s.",
                escalation.stack,
                MAX_STACK,
                escalation.penalty.as_secs()
            ),
            Notice::Expired { stack } => match self.config.decay_after_expiry(stack).as_secs() {
                0 => "Collisions restored.".to_string(),
                secs => format!(
                    "Collisions restored. Drive clean for {secs}s to drop below level {stack}."
                ),
            },
            Notice::Decayed { stack: 0 } => "Collision penalty cleared.".to_string(),
            Notice::Decayed { stack } => {
                format!("Collision penalty reduced to level {stack}/{MAX_STACK}.")
            }
        };
        self.notifier.send_message(entity, &text);
    }
}
