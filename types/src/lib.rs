//! Types shared between the noclip core and the service bridge.
//!
//! Everything here is plain data: entity identifiers, the fixed set of reasons a
//! feature may hold collisions off for, session kinds, and the inbound events the
//! game-server host forwards to the core.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod events;
pub mod session;

pub use events::{Connect, Disconnect, Event, OffTrackReport, SessionChange, Violation};
pub use session::SessionType;

/// Host-assigned car identifier, stable for the lifetime of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "car#{}", self.0)
    }
}

/// Why a feature wants collisions disabled for an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    RaceStart,
    Penalty,
    OffTrack,
}

impl Reason {
    pub const ALL: [Reason; 3] = [Reason::RaceStart, Reason::Penalty, Reason::OffTrack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::RaceStart => "race_start",
            Reason::Penalty => "penalty",
            Reason::OffTrack => "off_track",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
