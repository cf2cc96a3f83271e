//! Noclip collision arbitration core.
//!
//! Several independent policies may want a car's collisions switched off at the same
//! time: the race-start grace window, the progressive contact penalty, and off-track
//! reports. Each policy holds a [Reason](noclip_types::Reason) on the car through the
//! [Coordinator], which owns the single collision-enabled flag and writes it to the
//! [Host] only when the set of held reasons goes from empty to non-empty or back.
//!
//! ## Concurrency
//! - Per-car state lives in an [EntityTable]: one mutex per car, no global lock on the
//!   hot path.
//! - Locks are always taken feature state first, coordinator record second. A
//!   session change holds the [Arbiter]'s session gate exclusively.
//! - Timers are [Timer] handles carrying a generation; callbacks re-check that
//!   generation (and the state they guard) before acting, so a timer that lost a
//!   race with cancellation does nothing.
//! - All time comes from `tokio::time`, so tests run on a paused clock.
//!
//! The primary entrypoint is [`Arbiter`].
//!
//! ## Example
//! ```rust,ignore
//! use noclip_execution::{mocks::MemoryHost, Arbiter, ArbiterConfig};
//! use noclip_types::{Connect, EntityId, Event, Violation};
//! use std::sync::Arc;
//!
//! let host = Arc::new(MemoryHost::new());
//! let arbiter = Arbiter::new(ArbiterConfig::default(), host.clone(), host.clone());
//! arbiter.handle(&Event::Connect(Connect { entity: EntityId(1) }));
//! arbiter.handle(&Event::Collision(Violation { entity: EntityId(1), relative_speed_kph: 42.0 }));
//! assert_eq!(host.writes_for(EntityId(1)), vec![false]);
//! ```

pub mod arbiter;
pub mod coordinator;
pub mod display;
pub mod grace;
pub mod metrics;
pub mod off_track;
pub mod penalty;
pub mod timer;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod host;
mod table;

pub use arbiter::{Arbiter, ArbiterConfig, EntityStatus};
pub use coordinator::{Coordinator, EntitySnapshot};
pub use display::{format_tag, TagStyle};
pub use grace::{GraceConfig, RaceStartGrace};
pub use host::{Host, Notifier};
pub use metrics::Metrics;
pub use off_track::{OffTrackConfig, OffTrackMonitor};
pub use penalty::{PenaltyConfig, PenaltyLevel, PenaltyTracker, Standing, MAX_STACK};
pub use table::EntityTable;
pub use timer::{Timer, MAX_DELAY};
