//! Live event distribution.
//!
//! Many independent subscribers share one WebSocket connection. Each subscription names a
//! [`Topic`] and an [`EventKind`]; room membership on the server follows the set of live
//! subscriptions, and is rebuilt whenever the connection comes back.
//!
//! ```text
//! Client ─┬─ LifecycleBinder ── ConnectionManager ── transport
//!         └─ SubscriptionManager ─┬─ RoomTracker (join / leave frames)
//!                                 └─ callbacks (dispatch by topic and kind)
//! ```

#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

pub mod client;
pub mod interest;
pub mod lifecycle;
pub mod rooms;
pub mod subscription;
pub mod types;

// Re-export commonly used types
pub use client::Client;
pub use interest::{InterestTracker, MessageInterest};
pub use lifecycle::{ForcedLogoutHandler, LifecycleBinder, LiveConnection};
pub use rooms::RoomTracker;
pub use subscription::{Callback, Subscription, SubscriptionInfo, SubscriptionManager};
pub use types::request::{ControlFrame, RoomAction, RoomKind, Topic};
pub use types::response::{
    EventKind, InboundEvent, Notification, SensorReading, SensorStatus, SensorStatusChange,
    Severity,
};

pub use crate::ws::WsError;
