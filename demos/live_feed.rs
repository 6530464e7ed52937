//! Streams live sensor readings, status changes and notifications to the log.
//!
//! This demo shows how to:
//! 1. Create a client and register subscriptions before logging in
//! 2. Log in with a bearer token and follow the connection state
//! 3. React to a forced logout when the server refuses the token
//!
//! Run with tracing enabled:
//! ```sh
//! SENSORHUB_LIVE_URL=wss://live.sensorhub.dev/socket SENSORHUB_TOKEN=... \
//!     RUST_LOG=info,sensorhub_live=debug cargo run --example live_feed --features tracing
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=live_feed.log RUST_LOG=info cargo run --example live_feed --features tracing
//! ```
//!
//! Sensor and company ids are read from `SENSOR_IDS` and `COMPANY_ID`.

use std::fs::File;

use sensorhub_live::ws::ConnectionState;
use sensorhub_live::ws::config::Config;
use sensorhub_live::{Client, ENDPOINT_VAR, TOKEN_VAR};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let endpoint = std::env::var(ENDPOINT_VAR)?;
    let token = std::env::var(TOKEN_VAR)?;
    let sensor_ids = std::env::var("SENSOR_IDS").unwrap_or_else(|_| "S1".to_owned());

    let client = Client::new(&endpoint, Config::default())?;

    let mut subscriptions = Vec::new();
    for sensor_id in sensor_ids.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        subscriptions.push(client.subscribe_sensor_readings(sensor_id, |reading| {
            info!(
                sensor = %reading.sensor_id,
                value = reading.value,
                unit = reading.unit.as_deref().unwrap_or(""),
                "reading"
            );
        }));
    }

    subscriptions.push(client.subscribe_sensor_status(|change| {
        info!(sensor = %change.sensor_id, status = ?change.status, "status change");
    }));

    if let Ok(company_id) = std::env::var("COMPANY_ID") {
        subscriptions.push(client.subscribe_company_notifications(company_id, |notification| {
            info!(
                id = %notification.id,
                severity = ?notification.severity,
                message = %notification.message,
                "company notification"
            );
        }));
    }

    client.on_forced_logout(|error| warn!(%error, "token refused, signed out"));

    info!(
        endpoint = %client.endpoint(),
        subscriptions = subscriptions.len(),
        "logging in"
    );
    client.login(token);

    let mut states = client.state_receiver();
    loop {
        states.changed().await?;
        let state = *states.borrow_and_update();
        info!(?state, topics = ?client.active_topics(), "connection state");

        match state {
            ConnectionState::Failed { attempts } => {
                warn!(attempts, "giving up");
                break;
            }
            ConnectionState::Disconnected => break,
            _ => {}
        }
    }

    drop(subscriptions);
    Ok(())
}
