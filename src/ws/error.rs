#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite::http::StatusCode;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The server refused the bearer credential
    AuthenticationRejected {
        /// HTTP status of the refused upgrade, if the refusal happened during the handshake
        status: Option<StatusCode>,
        /// WebSocket close code, if the refusal arrived as a close frame
        close_code: Option<u16>,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Operation timed out
    Timeout,
    /// A subscriber callback panicked while handling an event
    CallbackPanicked {
        /// Identifier of the subscription whose callback failed
        subscription: u64,
        /// Panic payload, when it was a string
        message: String,
    },
}

impl WsError {
    /// Returns `true` for errors that must not be retried with the current credential.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationRejected { .. })
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::AuthenticationRejected {
                status: Some(status),
                ..
            } => write!(f, "WebSocket authentication rejected with status {status}"),
            Self::AuthenticationRejected {
                close_code: Some(code),
                ..
            } => write!(f, "WebSocket authentication rejected with close code {code}"),
            Self::AuthenticationRejected { .. } => write!(f, "WebSocket authentication rejected"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::CallbackPanicked {
                subscription,
                message,
            } => write!(f, "Callback for subscription {subscription} panicked: {message}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = if e.is_fatal() {
            crate::error::Kind::Authentication
        } else {
            crate::error::Kind::WebSocket
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
