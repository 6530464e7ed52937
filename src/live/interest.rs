use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

use super::types::response::{EventKind, InboundEvent, parse_if_interested};
use crate::ws::traits::MessageParser;

bitflags! {
    /// Event kinds the client currently wants to have deserialized.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageInterest: u8 {
        /// No interest in any event.
        const NONE = 0;

        /// Interest in `sensor:data` readings.
        const SENSOR_READING = 1;

        /// Interest in `sensor:status` changes.
        const SENSOR_STATUS = 1 << 1;

        /// Interest in notifications, for companies or administrators.
        const NOTIFICATION = 1 << 2;

        /// Interest in every event kind.
        const ALL = Self::SENSOR_READING.bits()
            | Self::SENSOR_STATUS.bits()
            | Self::NOTIFICATION.bits();
    }
}

impl MessageInterest {
    /// Interest flag for a wire event name, [`MessageInterest::NONE`] when the event is unknown.
    #[must_use]
    pub fn from_event(event: &str) -> Self {
        EventKind::from_event(event).map_or(Self::NONE, Self::from)
    }
}

impl From<EventKind> for MessageInterest {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::SensorReading => Self::SENSOR_READING,
            EventKind::SensorStatusChange => Self::SENSOR_STATUS,
            EventKind::Notification => Self::NOTIFICATION,
        }
    }
}

impl Default for MessageInterest {
    fn default() -> Self {
        Self::ALL
    }
}

/// Thread-safe interest set shared between the subscription registry and the connection.
///
/// Interest only grows. A kind nobody listens to any more is still parsed, and then dropped
/// by dispatch because no registration matches its topic.
#[derive(Debug, Default)]
pub struct InterestTracker {
    interest: AtomicU8,
}

impl InterestTracker {
    /// Create a new tracker with no interest.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interest: AtomicU8::new(0),
        }
    }

    pub fn add(&self, interest: MessageInterest) {
        self.interest.fetch_or(interest.bits(), Ordering::Release);
    }

    #[must_use]
    pub fn get(&self) -> MessageInterest {
        MessageInterest::from_bits(self.interest.load(Ordering::Acquire))
            .unwrap_or(MessageInterest::NONE)
    }

    #[must_use]
    pub fn is_interested(&self, interest: MessageInterest) -> bool {
        self.get().contains(interest)
    }
}

impl MessageParser<InboundEvent> for Arc<InterestTracker> {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<InboundEvent>> {
        parse_if_interested(bytes, self.get())
    }
}
