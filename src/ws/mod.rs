//! Core WebSocket infrastructure.
//!
//! Transport concerns only: one authenticated connection, its reconnection policy and
//! heartbeat, and the traits that let a higher layer parse frames and react to sessions
//! opening and closing.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Generic WebSocket connection handler with heartbeat and reconnection
//! - [`MessageParser`]: Trait for parsing incoming WebSocket messages
//! - [`Session`]: Trait for the layer that owns rooms and subscribers
//!
//! # Example
//!
//! ```ignore
//! let interest = Arc::new(InterestTracker::new());
//! let subscriptions = Arc::new(SubscriptionManager::new(Arc::clone(&interest)));
//! let connection = ConnectionManager::new(endpoint, config, interest, subscriptions)?;
//! connection.init(credential, Arc::new(|error| eprintln!("{error}")));
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
