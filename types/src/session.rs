use serde::{Deserialize, Serialize};

/// Session kinds announced by the game-server host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Booking,
    Practice,
    Qualifying,
    Race,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Booking => "booking",
            SessionType::Practice => "practice",
            SessionType::Qualifying => "qualifying",
            SessionType::Race => "race",
        }
    }
}
