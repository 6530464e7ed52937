use std::fmt;

use serde::Serialize;
use strum_macros::Display;

/// Logical subscription channel derived from an entity id.
///
/// `Sensor` and `Company` topics are server-side rooms that the connection has to join and
/// leave explicitly. `Admin` and `Fleet` are delivered by the server based on the user's role
/// and never produce control frames.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Readings of one sensor, `sensor:<sensorId>`
    Sensor(String),
    /// Notifications of one company, `company:<companyId>`
    Company(String),
    /// Notifications not bound to a company, `admin`
    Admin,
    /// Status changes across all sensors, `sensors`
    Fleet,
}

impl Topic {
    #[must_use]
    pub fn sensor<S: Into<String>>(sensor_id: S) -> Self {
        Self::Sensor(sensor_id.into())
    }

    #[must_use]
    pub fn company<S: Into<String>>(company_id: S) -> Self {
        Self::Company(company_id.into())
    }

    /// The room this topic maps to, if membership has to be signalled on the wire.
    #[must_use]
    pub fn room(&self) -> Option<(RoomKind, &str)> {
        match self {
            Self::Sensor(id) => Some((RoomKind::Sensor, id)),
            Self::Company(id) => Some((RoomKind::Company, id)),
            Self::Admin | Self::Fleet => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(id) => write!(f, "sensor:{id}"),
            Self::Company(id) => write!(f, "company:{id}"),
            Self::Admin => f.write_str("admin"),
            Self::Fleet => f.write_str("sensors"),
        }
    }
}

/// Kind of server-side room.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RoomKind {
    Sensor,
    Company,
}

/// Membership change requested from the server.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RoomAction {
    Join,
    Leave,
}

/// Outbound control frame, e.g. `{"event":"join:sensor","data":"S1"}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    /// `<action>:<room kind>`
    pub event: String,
    /// Raw id of the room
    pub data: String,
}

impl ControlFrame {
    #[must_use]
    pub fn new(action: RoomAction, kind: RoomKind, id: &str) -> Self {
        Self {
            event: format!("{action}:{kind}"),
            data: id.to_owned(),
        }
    }

    /// Join frame for `topic`, if it is a room.
    #[must_use]
    pub fn join(topic: &Topic) -> Option<Self> {
        topic
            .room()
            .map(|(kind, id)| Self::new(RoomAction::Join, kind, id))
    }

    /// Leave frame for `topic`, if it is a room.
    #[must_use]
    pub fn leave(topic: &Topic) -> Option<Self> {
        topic
            .room()
            .map(|(kind, id)| Self::new(RoomAction::Leave, kind, id))
    }
}
