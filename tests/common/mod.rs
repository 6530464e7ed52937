#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    dead_code,
    reason = "Each integration test binary uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use sensorhub_live::ws::ConnectionState;
use sensorhub_live::ws::config::{Config, ReconnectConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, http};

pub const TOKEN: &str = "test-token";

/// What the mock server does with every open connection.
#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Close(u16),
    Drop,
}

/// Mock live endpoint.
///
/// Records the `Authorization` header of every upgrade request and every text frame clients
/// send, and can push frames, close codes or abrupt drops to all open connections.
pub struct MockLiveServer {
    addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    frames_rx: mpsc::UnboundedReceiver<String>,
    auth_rx: mpsc::UnboundedReceiver<Option<String>>,
    handshakes: Arc<AtomicUsize>,
    reject_status: Arc<AtomicU16>,
}

impl MockLiveServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<Command>(100);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<String>();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel::<Option<String>>();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let reject_status = Arc::new(AtomicU16::new(0));

        let server_commands = commands.clone();
        let server_handshakes = Arc::clone(&handshakes);
        let server_reject = Arc::clone(&reject_status);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake completes so nothing sent after the client
                // reports `Connected` can be missed.
                let mut command_rx = server_commands.subscribe();
                let auth_tx = auth_tx.clone();
                let handshakes = Arc::clone(&server_handshakes);
                let reject = server_reject.load(Ordering::SeqCst);

                let callback = move |request: &Request, response: Response| {
                    handshakes.fetch_add(1, Ordering::SeqCst);
                    let header = request
                        .headers()
                        .get(http::header::AUTHORIZATION)
                        .and_then(|value| value.to_str().ok())
                        .map(ToOwned::to_owned);
                    drop(auth_tx.send(header));

                    if reject == 0 {
                        Ok(response)
                    } else {
                        let error: ErrorResponse = http::Response::builder()
                            .status(StatusCode::from_u16(reject).unwrap())
                            .body(None)
                            .unwrap();
                        Err(error)
                    }
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let frames_tx = frames_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(frames_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close(code)) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "".into(),
                                        };
                                        drop(write.send(Message::Close(Some(frame))).await);
                                        break;
                                    }
                                    Ok(Command::Drop) | Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            frames_rx,
            auth_rx,
            handshakes,
            reject_status,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/live", self.addr)
    }

    /// Refuse every following upgrade request with `status`.
    pub fn reject_with(&self, status: StatusCode) {
        self.reject_status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Send a text frame to every open connection.
    pub fn send(&self, text: &str) {
        drop(self.commands.send(Command::Text(text.to_owned())));
    }

    pub fn send_json(&self, value: &Value) {
        self.send(&value.to_string());
    }

    /// Close every open connection with `code`.
    pub fn close_all(&self, code: u16) {
        drop(self.commands.send(Command::Close(code)));
    }

    /// Drop every open connection without a closing handshake.
    pub fn drop_all(&self) {
        drop(self.commands.send(Command::Drop));
    }

    /// Number of upgrade requests seen so far, accepted or not.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Next control frame sent by a client, waiting up to two seconds.
    pub async fn recv_frame(&mut self) -> Option<Value> {
        self.recv_frame_within(Duration::from_secs(2)).await
    }

    pub async fn recv_frame_within(&mut self, wait: Duration) -> Option<Value> {
        timeout(wait, self.frames_rx.recv())
            .await
            .ok()
            .flatten()
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    /// `Authorization` header of the next upgrade request.
    pub async fn recv_authorization(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.auth_rx.recv())
            .await
            .ok()
            .flatten()
            .flatten()
    }
}

pub fn join(kind: &str, id: &str) -> Value {
    json!({ "event": format!("join:{kind}"), "data": id })
}

pub fn leave(kind: &str, id: &str) -> Value {
    json!({ "event": format!("leave:{kind}"), "data": id })
}

/// Config with a short reconnect delay, so tests do not wait on the production default.
pub fn fast_config(max_attempts: Option<u32>) -> Config {
    Config::builder()
        .reconnect(ReconnectConfig::fixed(Duration::from_millis(50), max_attempts))
        .build()
}

/// Wait until the observed state satisfies `predicate`.
pub async fn wait_for_state<F>(
    states: &mut watch::Receiver<ConnectionState>,
    predicate: F,
) -> ConnectionState
where
    F: Fn(ConnectionState) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let state = *states.borrow_and_update();
            if predicate(state) {
                return state;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap()
}

pub mod payloads {
    use serde_json::{Value, json};

    #[must_use]
    pub fn reading(sensor_id: &str, value: f64) -> Value {
        json!({
            "event": "sensor:data",
            "data": {
                "sensorId": sensor_id,
                "value": value,
                "unit": "°C",
                "timestamp": "2026-03-01T12:00:00Z"
            }
        })
    }

    #[must_use]
    pub fn status(sensor_id: &str, status: &str) -> Value {
        json!({
            "event": "sensor:status",
            "data": { "sensorId": sensor_id, "status": status }
        })
    }

    #[must_use]
    pub fn notification(id: &str, company_id: Option<&str>, message: &str) -> Value {
        let mut data = json!({ "id": id, "message": message, "severity": "warning" });
        if let Some(company_id) = company_id {
            data["companyId"] = json!(company_id);
        }
        json!({ "event": "notification", "data": data })
    }
}
