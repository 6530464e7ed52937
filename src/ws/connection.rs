#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::traits::{MessageParser, Outbound, Session};
use crate::Result;
use crate::auth::Credential;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback invoked once when the server refuses the credential.
pub type RejectionHandler = Arc<dyn Fn(&WsError) + Send + Sync>;

/// Close code used by the server for "policy violation", sent when a token expires mid-session.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Application close code the server uses for "unauthorized".
const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no connection attempt is scheduled
    Disconnected,
    /// Attempting the first connection of a session
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting to retry after a failure
    Reconnecting {
        /// Number of the reconnection attempt that is scheduled next, starting at 1 after
        /// every successful connection and after a failed first connection
        attempt: u32,
    },
    /// Reconnection attempts were exhausted. Only a new `init` leaves this state.
    Failed {
        /// Number of consecutive reconnection attempts that failed
        attempts: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// The running connection task of one credential.
struct ActiveSession {
    generation: u64,
    cancel: CancellationToken,
    /// Present while the transport is open
    outbound: Option<Outbound>,
}

/// Manages the WebSocket connection lifecycle, reconnection, and heartbeat.
///
/// This connection manager handles all transport concerns:
/// - Establishing a connection authenticated with a bearer [`Credential`]
/// - Automatic reconnection with bounded attempts and configurable backoff
/// - Heartbeat monitoring via PING/PONG frames
/// - Handing parsed inbound messages to its [`Session`], in frame order
///
/// It knows nothing about rooms or subscribers: every session it opens or closes is reported to
/// the [`Session`], which is where membership is rebuilt after a reconnect.
///
/// # Type Parameters
///
/// - `M`: Message type produced by the parser
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new("wss://example.com/live", config, parser, session)?;
/// connection.init(Credential::from(token), Arc::new(|_| {}));
///
/// let mut state = connection.state_receiver();
/// while state.changed().await.is_ok() {
///     println!("{:?}", *state.borrow());
/// }
/// ```
pub struct ConnectionManager<M, P>
where
    M: Send + 'static,
    P: MessageParser<M>,
{
    shared: Arc<Shared<M, P>>,
}

struct Shared<M, P>
where
    M: Send + 'static,
    P: MessageParser<M>,
{
    endpoint: String,
    config: Config,
    parser: P,
    session: Arc<dyn Session<M>>,
    state_tx: watch::Sender<ConnectionState>,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

impl<M, P> ConnectionManager<M, P>
where
    M: Send + 'static,
    P: MessageParser<M>,
{
    /// Create a connection manager for `endpoint`.
    ///
    /// Nothing is opened until [`ConnectionManager::init`] supplies a credential. The endpoint
    /// must be a `ws://` or `wss://` URL.
    pub fn new(
        endpoint: &str,
        config: Config,
        parser: P,
        session: Arc<dyn Session<M>>,
    ) -> Result<Self> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            shared: Arc::new(Shared {
                endpoint: endpoint.to_owned(),
                config,
                parser,
                session,
                state_tx,
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Open a connection authenticated with `credential`.
    ///
    /// Returns `false` without doing anything if a session already exists (connecting,
    /// connected or reconnecting). A session that ended in [`ConnectionState::Failed`] is
    /// replaced. `on_rejected` runs once if the server refuses the credential.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(&self, credential: Credential, on_rejected: RejectionHandler) -> bool {
        let mut active = self.shared.lock_active();
        if active.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connection already initialised, ignoring init");
            return false;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        *active = Some(ActiveSession {
            generation,
            cancel: cancel.clone(),
            outbound: None,
        });
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        drop(active);

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, endpoint = %self.shared.endpoint, "Opening connection");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared
                .connection_loop(generation, credential, cancel, on_rejected)
                .await;
        });

        true
    }

    /// Close the active transport, if any, and discard the credential.
    ///
    /// Safe to call in any state. The [`Session`] is told the transport is gone before this
    /// returns, so nothing queued afterwards reaches the wire.
    pub fn disconnect(&self) {
        let mut active = self.shared.lock_active();
        if let Some(session) = active.take() {
            session.cancel.cancel();
            if let Some(outbound) = &session.outbound {
                self.shared.session.closed(outbound);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(generation = session.generation, "Connection closed by caller");
        }
        self.shared
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Returns `true` only while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns `true` while a credential is held and a connection task is running.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.shared.lock_active().is_some()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}

impl<M, P> Drop for ConnectionManager<M, P>
where
    M: Send + 'static,
    P: MessageParser<M>,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<M, P> Shared<M, P>
where
    M: Send + 'static,
    P: MessageParser<M>,
{
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // The slot is always left in a consistent state, so a poisoned lock is still usable.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `state` if `generation` is still the current session.
    fn publish(&self, generation: u64, state: ConnectionState) -> bool {
        let active = self.lock_active();
        match active.as_ref() {
            Some(session) if session.generation == generation => {
                self.state_tx.send_replace(state);
                true
            }
            _ => false,
        }
    }

    /// Publish `Connected` and hand the new transport to the session layer.
    fn attach(&self, generation: u64, outbound: &Outbound) -> bool {
        let mut active = self.lock_active();
        match active.as_mut() {
            Some(session) if session.generation == generation => {
                session.outbound = Some(outbound.clone());
                self.state_tx.send_replace(ConnectionState::Connected {
                    since: Instant::now(),
                });
                self.session.opened(outbound);
                true
            }
            _ => false,
        }
    }

    fn detach(&self, generation: u64, outbound: &Outbound) {
        let mut active = self.lock_active();
        if let Some(session) = active.as_mut()
            && session.generation == generation
        {
            session.outbound = None;
        }
        self.session.closed(outbound);
    }

    /// End the session of `generation` with `state`, dropping the credential.
    fn finish(&self, generation: u64, state: ConnectionState) -> bool {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|session| session.generation == generation)
        {
            *active = None;
            self.state_tx.send_replace(state);
            true
        } else {
            false
        }
    }

    fn upgrade_request(&self, credential: &Credential) -> Result<Request> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, credential.bearer_header()?);
        Ok(request)
    }

    /// Main connection loop with automatic reconnection.
    async fn connection_loop(
        &self,
        generation: u64,
        credential: Credential,
        cancel: CancellationToken,
        on_rejected: RejectionHandler,
    ) {
        // Failed reconnection attempts. The first connection of a session is not a retry.
        let mut attempt = 0_u32;
        let mut initial = true;
        let mut backoff: backoff::ExponentialBackoff = self.config.reconnect.clone().into();

        loop {
            let request = match self.upgrade_request(&credential) {
                Ok(request) => request,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "Unable to build upgrade request");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    self.finish(generation, ConnectionState::Failed { attempts: attempt });
                    return;
                }
            };

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = connect_async(request) => result,
            };

            match connected {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    initial = false;
                    backoff.reset();

                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let outbound = Outbound::new(outbound_tx);
                    if !self.attach(generation, &outbound) {
                        return;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(generation, "Connected");

                    let result = self.handle_connection(ws_stream, outbound_rx, &cancel).await;
                    self.detach(generation, &outbound);

                    match result {
                        Ok(()) => return,
                        Err(e) if e.is_fatal() => {
                            self.reject(generation, &e, &on_rejected);
                            return;
                        }
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Connection dropped");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                }
                Err(e) => {
                    let error = classify_connect_error(e);
                    if error.is_fatal() {
                        self.reject(generation, &error, &on_rejected);
                        return;
                    }

                    if initial {
                        initial = false;
                    } else {
                        attempt = attempt.saturating_add(1);
                    }
                    #[cfg(feature = "tracing")]
                    tracing::warn!(attempt, error = %error, "Unable to connect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                }
            }

            // Check if we should stop reconnecting
            if self.config.reconnect.is_exhausted(attempt) {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts = attempt, "Reconnection attempts exhausted");
                self.finish(generation, ConnectionState::Failed { attempts: attempt });
                return;
            }

            let next = ConnectionState::Reconnecting {
                attempt: attempt.saturating_add(1),
            };
            if !self.publish(generation, next) {
                return;
            }

            if let Some(duration) = backoff.next_backoff() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    () = sleep(duration) => {}
                }
            }
        }
    }

    fn reject(&self, generation: u64, error: &WsError, on_rejected: &RejectionHandler) {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %error, "Credential rejected, dropping session");

        if self.finish(generation, ConnectionState::Disconnected) {
            on_rejected(error);
        }
    }

    /// Handle an active WebSocket connection.
    ///
    /// Returns `Ok(())` when cancelled by the caller and an error when the transport is lost.
    async fn handle_connection(
        &self,
        ws_stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), WsError> {
        let (mut write, mut read) = ws_stream.split();

        // Channel to notify heartbeat loop when PONG is received
        let (pong_tx, pong_rx) = watch::channel(Instant::now());
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();

        let config = self.config.clone();
        let mut heartbeat = tokio::spawn(async move {
            heartbeat_loop(ping_tx, &config, pong_rx).await;
        });

        let result = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    drop(write.send(Message::Close(None)).await);
                    break Ok(());
                }

                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");

                            match self.parser.parse(text.as_bytes()) {
                                Ok(messages) => {
                                    for message in messages {
                                        self.session.deliver(message);
                                    }
                                }
                                Err(e) => {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                                    #[cfg(not(feature = "tracing"))]
                                    let _ = (&text, &e);
                                }
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            _ = pong_tx.send(Instant::now());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break Err(classify_close(frame.as_ref()));
                        }
                        Some(Err(e)) => {
                            break Err(WsError::Connection(e));
                        }
                        None => {
                            break Err(WsError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol, PINGs are answered by tungstenite.
                        }
                    }
                }

                // Handle outgoing control frames
                Some(text) = outbound_rx.recv() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Sending WebSocket text message");

                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Err(WsError::Connection(e));
                    }
                }

                // Handle PING requests from heartbeat loop
                Some(()) = ping_rx.recv() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        break Err(WsError::Connection(e));
                    }
                }

                // The heartbeat loop only ends when a PONG is overdue
                _ = &mut heartbeat => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "Heartbeat timeout: no PONG received within {:?}",
                        self.config.heartbeat_timeout
                    );
                    break Err(WsError::Timeout);
                }
            }
        };

        // Cleanup
        heartbeat.abort();

        result
    }
}

/// Heartbeat loop that requests PING frames and monitors PONG responses.
///
/// Returns when a PONG does not arrive within the configured timeout or the message loop is
/// gone.
async fn heartbeat_loop(
    ping_tx: mpsc::UnboundedSender<()>,
    config: &Config,
    mut pong_rx: watch::Receiver<Instant>,
) {
    let start = tokio::time::Instant::now() + config.heartbeat_interval;
    let mut ping_interval = interval_at(start, config.heartbeat_interval);

    loop {
        ping_interval.tick().await;

        // Mark current PONG state as seen before sending PING
        // This prevents changed() from returning immediately due to a stale PONG
        drop(pong_rx.borrow_and_update());

        let ping_sent = Instant::now();
        if ping_tx.send(()).is_err() {
            // Message loop has terminated
            break;
        }

        match timeout(config.heartbeat_timeout, pong_rx.changed()).await {
            Ok(Ok(())) => {
                let last_pong = *pong_rx.borrow_and_update();
                if last_pong < ping_sent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("PONG received but older than last PING, connection may be stale");
                    break;
                }
            }
            // Channel closed, connection is terminating
            Ok(Err(_)) => break,
            // Timeout waiting for PONG
            Err(_) => break,
        }
    }
}

fn classify_connect_error(error: tungstenite::Error) -> WsError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            WsError::AuthenticationRejected {
                status: Some(response.status()),
                close_code: None,
            }
        }
        other => WsError::Connection(other),
    }
}

fn classify_close(frame: Option<&CloseFrame>) -> WsError {
    let code = frame.map(|frame| u16::from(frame.code));
    match code {
        Some(CLOSE_POLICY_VIOLATION | CLOSE_UNAUTHORIZED) => WsError::AuthenticationRejected {
            status: None,
            close_code: code,
        },
        _ => WsError::ConnectionClosed,
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    struct NoopParser;

    impl MessageParser<String> for NoopParser {
        fn parse(&self, bytes: &[u8]) -> Result<Vec<String>> {
            Ok(vec![String::from_utf8_lossy(bytes).into_owned()])
        }
    }

    struct NoopSession;

    impl Session<String> for NoopSession {
        fn opened(&self, _outbound: &Outbound) {}
        fn closed(&self, _outbound: &Outbound) {}
        fn deliver(&self, _message: String) {}
    }

    fn manager(endpoint: &str) -> Result<ConnectionManager<String, NoopParser>> {
        ConnectionManager::new(endpoint, Config::default(), NoopParser, Arc::new(NoopSession))
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let err = manager("https://example.com/live").err().unwrap();
        assert_eq!(err.kind(), crate::error::Kind::Validation);

        let err = manager("not a url").err().unwrap();
        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn starts_disconnected_without_session() {
        let connection = manager("ws://127.0.0.1:1/live").unwrap();

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.is_connected());
        assert!(!connection.has_session());
    }

    #[test]
    fn disconnect_when_disconnected_is_noop() {
        let connection = manager("ws://127.0.0.1:1/live").unwrap();

        connection.disconnect();
        connection.disconnect();

        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn unauthorized_handshake_is_fatal() {
        let response = tungstenite::http::Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(None)
            .unwrap();

        let error = classify_connect_error(tungstenite::Error::Http(response.into()));
        assert!(error.is_fatal());
    }

    #[test]
    fn server_error_handshake_is_transient() {
        let response = tungstenite::http::Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(None)
            .unwrap();

        let error = classify_connect_error(tungstenite::Error::Http(response.into()));
        assert!(!error.is_fatal());
    }

    #[test]
    fn policy_close_is_fatal() {
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: "token expired".into(),
        };
        assert!(classify_close(Some(&frame)).is_fatal());

        let frame = CloseFrame {
            code: CloseCode::from(CLOSE_UNAUTHORIZED),
            reason: "".into(),
        };
        assert!(classify_close(Some(&frame)).is_fatal());
    }

    #[test]
    fn normal_close_is_transient() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        assert!(!classify_close(Some(&frame)).is_fatal());
        assert!(!classify_close(None).is_fatal());
    }

    #[tokio::test]
    async fn init_is_noop_while_session_exists() {
        let connection = manager("ws://127.0.0.1:1/live").unwrap();
        let handler: RejectionHandler = Arc::new(|_| {});

        assert!(connection.init(Credential::from("a"), Arc::clone(&handler)));
        assert!(!connection.init(Credential::from("b"), handler));
        assert!(connection.has_session());

        connection.disconnect();
        assert!(!connection.has_session());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }
}
