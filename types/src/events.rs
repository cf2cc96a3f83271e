//! Inbound events forwarded by the game-server host.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{EntityId, SessionType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    pub entity: EntityId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    pub entity: EntityId,
}

/// The host moved to a new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    #[serde(default)]
    pub previous: Option<SessionType>,
    pub next: SessionType,
    /// Time from receipt until the announced session start (lights out for a race).
    #[serde(default)]
    pub starts_in_ms: u64,
}

impl SessionChange {
    pub fn starts_in(&self) -> Duration {
        Duration::from_millis(self.starts_in_ms)
    }
}

/// A car-to-car contact reported by the host's collision sensor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub entity: EntityId,
    pub relative_speed_kph: f32,
}

/// A client-side recommendation about whether the car should be ghosted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffTrackReport {
    pub entity: EntityId,
    #[serde(default)]
    pub wheels_out: u8,
    #[serde(default)]
    pub wrong_direction: bool,
    pub disable_collisions: bool,
    #[serde(default)]
    pub reason_label: String,
}

/// Every event the core reacts to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Connect(Connect),
    Disconnect(Disconnect),
    Session(SessionChange),
    Collision(Violation),
    OffTrack(OffTrackReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_collision() {
        let event: Event =
            serde_json::from_str(r#"{"type":"collision","entity":4,"relative_speed_kph":37.5}"#)
                .unwrap();
        assert_eq!(
            event,
            Event::Collision(Violation {
                entity: EntityId(4),
                relative_speed_kph: 37.5,
            })
        );
    }

    #[test]
    fn test_parse_session_with_defaults() {
        let event: Event = serde_json::from_str(r#"{"type":"session","next":"race"}"#).unwrap();
        let Event::Session(change) = event else {
            panic!("expected session event");
        };
        assert_eq!(change.previous, None);
        assert_eq!(change.next, SessionType::Race);
        assert_eq!(change.starts_in(), Duration::ZERO);
    }

    #[test]
    fn test_parse_off_track_report() {
        let event: Event = serde_json::from_str(
            r#"{"type":"off_track","entity":2,"wheels_out":4,"wrong_direction":false,"disable_collisions":true,"reason_label":"4 wheels off"}"#,
        )
        .unwrap();
        let Event::OffTrack(report) = event else {
            panic!("expected off-track report");
        };
        assert!(report.disable_collisions);
        assert_eq!(report.wheels_out, 4);
        assert_eq!(report.reason_label, "4 wheels off");
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<Event>(r#"{"type":"teleport","entity":1}"#).is_err());
    }
}
