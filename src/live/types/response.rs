use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::de::{IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer as _, Serialize};
use serde_json::{Deserializer, Value};
use serde_with::serde_as;
use strum_macros::Display;

use super::request::Topic;
use crate::live::interest::MessageInterest;
use crate::serde_helpers::{StringFromAny, deserialize_with_warnings};

/// Kind of event carried by an inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventKind {
    /// `sensor:data`
    SensorReading,
    /// `sensor:status`
    SensorStatusChange,
    /// `notification`
    Notification,
}

impl EventKind {
    /// Map a wire event name to its kind.
    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            "sensor:data" => Some(Self::SensorReading),
            "sensor:status" => Some(Self::SensorStatusChange),
            "notification" => Some(Self::Notification),
            _ => None,
        }
    }
}

/// Top-level inbound event.
///
/// All data frames received from the live endpoint are deserialized into this enum.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// A new measurement from one sensor
    #[serde(rename = "sensor:data")]
    SensorReading(SensorReading),
    /// A sensor changed its operational status
    #[serde(rename = "sensor:status")]
    SensorStatusChange(SensorStatusChange),
    /// A notification for a company, or for administrators when no company is set
    #[serde(rename = "notification")]
    Notification(Notification),
}

impl InboundEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::SensorReading(_) => EventKind::SensorReading,
            Self::SensorStatusChange(_) => EventKind::SensorStatusChange,
            Self::Notification(_) => EventKind::Notification,
        }
    }

    /// The single topic this event is delivered on.
    ///
    /// Notifications carrying a company id belong to that company's topic only; the admin
    /// topic receives notifications without one.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::SensorReading(reading) => Topic::Sensor(reading.sensor_id.clone()),
            Self::SensorStatusChange(_) => Topic::Fleet,
            Self::Notification(notification) => notification
                .company_id
                .as_ref()
                .map_or(Topic::Admin, |company_id| Topic::Company(company_id.clone())),
        }
    }
}

/// Measurement reported by a sensor.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Sensor identifier
    #[serde_as(as = "StringFromAny")]
    #[builder(into)]
    pub sensor_id: String,
    /// Measured value
    pub value: f64,
    /// Unit of `value`, e.g. `°C` or `kPa`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub unit: Option<String>,
    /// When the measurement was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Operational status change of a sensor.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatusChange {
    /// Sensor identifier
    #[serde_as(as = "StringFromAny")]
    #[builder(into)]
    pub sensor_id: String,
    /// New status
    pub status: SensorStatus,
    /// When the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Operational status of a sensor.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Online,
    Offline,
    Warning,
    Error,
    Maintenance,
    /// Unknown status from the server (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Notification pushed to a company or to administrators.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification identifier
    #[serde_as(as = "StringFromAny")]
    #[builder(into)]
    pub id: String,
    /// Owning company, absent for platform-wide notifications
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub company_id: Option<String>,
    /// Sensor the notification is about, if any
    #[serde_as(as = "Option<StringFromAny>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub sensor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub title: Option<String>,
    #[builder(into)]
    pub message: String,
    #[serde(default)]
    #[builder(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Notification severity.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
    /// Unknown severity from the server (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Result of peeking at the message structure without full deserialization.
enum MessageShape {
    /// Single object with the given `event` (if present).
    Single(Option<String>),
    /// Array of messages requiring per-element inspection.
    Array,
}

/// Peeks at the JSON structure to determine if it's a single object or array,
/// and extracts the `event` for single objects without full deserialization.
fn peek_message_shape(bytes: &[u8]) -> Result<MessageShape, serde_json::Error> {
    struct ShapePeeker;

    impl<'de> Visitor<'de> for ShapePeeker {
        type Value = MessageShape;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a JSON object or array")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            // Consume the entire sequence to avoid "trailing characters" error
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(MessageShape::Array)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut event: Option<String> = None;
            while let Some(key) = map.next_key::<String>()? {
                if key == "event" {
                    event = Some(map.next_value::<String>()?);
                } else {
                    map.next_value::<IgnoredAny>()?;
                }
            }
            Ok(MessageShape::Single(event))
        }
    }

    let mut de = Deserializer::from_slice(bytes);
    de.deserialize_any(ShapePeeker)
}

/// Whether a frame with this event name should be fully deserialized.
fn is_wanted(event: &str, interest: MessageInterest) -> bool {
    EventKind::from_event(event).is_some_and(|kind| interest.contains(kind.into()))
}

/// Deserialize events from the byte slice, filtering by interest.
///
/// Empty and whitespace-only frames are keep-alives and yield nothing. For single objects the
/// `event` name is extracted first so frames nobody subscribed to, and events this client does
/// not know, are skipped without full deserialization. Arrays are filtered element by element,
/// and a malformed element is logged and skipped without losing the rest of the batch.
pub fn parse_if_interested(
    bytes: &[u8],
    interest: MessageInterest,
) -> crate::Result<Vec<InboundEvent>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    match peek_message_shape(bytes)? {
        MessageShape::Single(None) => Ok(Vec::new()),
        MessageShape::Single(Some(event)) => {
            if !is_wanted(&event, interest) {
                return Ok(Vec::new());
            }
            let value: Value = serde_json::from_slice(bytes)?;
            Ok(vec![deserialize_with_warnings(value)?])
        }
        MessageShape::Array => {
            let frames: Vec<Value> = serde_json::from_slice(bytes)?;
            let events: Vec<InboundEvent> = frames
                .into_iter()
                .filter(|frame| {
                    frame
                        .get("event")
                        .and_then(Value::as_str)
                        .is_some_and(|event| is_wanted(event, interest))
                })
                .filter_map(|frame| match deserialize_with_warnings::<InboundEvent>(frame) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Skipping malformed event in batch");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        None
                    }
                })
                .collect();
            Ok(events)
        }
    }
}
