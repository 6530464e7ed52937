//! Core traits for generic WebSocket infrastructure.

use serde::Serialize;
use tokio::sync::mpsc;

use super::error::WsError;
use crate::Result;

/// Message parser trait for converting raw bytes to messages.
///
/// Implementations may drop frames nobody is interested in before fully deserializing them,
/// which is what the live event parser does with its interest set.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return empty vec if messages are filtered out based on interest or other criteria.
    /// Handles both single objects and arrays of messages.
    fn parse(&self, bytes: &[u8]) -> Result<Vec<M>>;
}

/// The layer sitting on top of a [`super::ConnectionManager`].
///
/// The connection manager knows nothing about rooms or subscribers. It reports every
/// transport session it opens and closes, and hands over every parsed inbound message, in
/// the order frames were received.
pub trait Session<M>: Send + Sync + 'static {
    /// A transport session was established. `outbound` stays valid until the matching
    /// [`Session::closed`] call.
    fn opened(&self, outbound: &Outbound);

    /// The transport session that was reported with `outbound` is gone.
    fn closed(&self, outbound: &Outbound);

    /// A message arrived on the current transport session.
    fn deliver(&self, message: M);
}

/// Sending half of one transport session.
///
/// Frames are queued without blocking and written by the connection task. Once the session
/// ends, sends fail with [`WsError::ConnectionClosed`].
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Serialize `request` and queue it on this session.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.tx
            .send(json)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Whether both handles refer to the same transport session.
    #[must_use]
    pub fn same_session(&self, other: &Outbound) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
