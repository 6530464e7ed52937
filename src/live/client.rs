use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::interest::InterestTracker;
use super::lifecycle::{LifecycleBinder, LiveConnection};
use super::subscription::{Callback, Subscription, SubscriptionInfo, SubscriptionManager};
use super::types::request::Topic;
use super::types::response::{
    EventKind, InboundEvent, Notification, SensorReading, SensorStatusChange,
};
use crate::Result;
use crate::auth::Credential;
use crate::ws::WsError;
use crate::ws::config::Config;
use crate::ws::connection::ConnectionState;
use crate::ws::traits::Session;

/// Live event client for the monitoring dashboard.
///
/// One client owns one WebSocket connection, shared by every subscription made through it.
/// Clones share the connection and the registry. The connection is opened by
/// [`Client::login`] and closed by [`Client::logout`]; subscriptions can be made at any time
/// and outlive both.
///
/// # Examples
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use sensorhub_live::Client;
/// use sensorhub_live::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://live.sensorhub.dev/socket", Config::default())?;
///
///     let _readings = client.subscribe_sensor_readings("S1", |reading| {
///         println!("{} = {}", reading.sensor_id, reading.value);
///     });
///
///     client.on_forced_logout(|error| eprintln!("signed out: {error}"));
///     client.login("token-from-the-auth-service");
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     client.logout();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: String,
    subscriptions: Arc<SubscriptionManager>,
    connection: Arc<LiveConnection>,
    binder: LifecycleBinder,
}

impl Client {
    /// Create a client for `endpoint`, a `ws://` or `wss://` URL.
    ///
    /// Nothing is connected until [`Client::login`].
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let interest = Arc::new(InterestTracker::new());
        let subscriptions = Arc::new(SubscriptionManager::new(Arc::clone(&interest)));
        let session = Arc::clone(&subscriptions) as Arc<dyn Session<InboundEvent>>;
        let connection = Arc::new(LiveConnection::new(endpoint, config, interest, session)?);
        let binder = LifecycleBinder::new(Arc::clone(&connection));

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint: endpoint.to_owned(),
                subscriptions,
                connection,
                binder,
            }),
        })
    }

    /// Connect with the bearer `credential`.
    ///
    /// Does nothing and returns `false` while a connection is already running, including
    /// while it is reconnecting. After [`ConnectionState::Failed`] a new login starts over.
    pub fn login<C: Into<Credential>>(&self, credential: C) -> bool {
        self.inner.binder.credential_available(credential.into())
    }

    /// Disconnect and discard the credential.
    ///
    /// Subscriptions stay registered and start receiving again after the next login.
    pub fn logout(&self) {
        self.inner.binder.credential_withdrawn();
    }

    /// Run `handler` when the server refuses the credential.
    ///
    /// By then the connection is closed and will not retry; the application is expected to
    /// drop its session and ask the user to sign in again.
    pub fn on_forced_logout<F>(&self, handler: F)
    where
        F: Fn(&WsError) + Send + Sync + 'static,
    {
        self.inner.binder.on_forced_logout(Arc::new(handler));
    }

    /// Receive readings of one sensor.
    pub fn subscribe_sensor_readings<S, F>(&self, sensor_id: S, callback: F) -> Subscription
    where
        S: Into<String>,
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        self.subscribe(
            Topic::sensor(sensor_id),
            EventKind::SensorReading,
            Box::new(move |event| {
                if let InboundEvent::SensorReading(reading) = event {
                    callback(reading);
                }
            }),
        )
    }

    /// Receive status changes of every sensor visible to the user.
    pub fn subscribe_sensor_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SensorStatusChange) + Send + Sync + 'static,
    {
        self.subscribe(
            Topic::Fleet,
            EventKind::SensorStatusChange,
            Box::new(move |event| {
                if let InboundEvent::SensorStatusChange(change) = event {
                    callback(change);
                }
            }),
        )
    }

    /// Receive notifications addressed to one company.
    pub fn subscribe_company_notifications<S, F>(&self, company_id: S, callback: F) -> Subscription
    where
        S: Into<String>,
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe(
            Topic::company(company_id),
            EventKind::Notification,
            notification_callback(callback),
        )
    }

    /// Receive notifications that carry no company, sent to administrators.
    pub fn subscribe_admin_notifications<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscribe(Topic::Admin, EventKind::Notification, notification_callback(callback))
    }

    /// Register a raw callback for `kind` events on `topic`.
    pub fn subscribe(&self, topic: Topic, kind: EventKind, callback: Callback) -> Subscription {
        self.inner.subscriptions.subscribe(topic, kind, callback)
    }

    /// Returns `true` only while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Number of live subscriptions, whether connected or not.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.subscription_count()
    }

    /// Live subscriptions ordered by creation.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.subscriptions.active_subscriptions()
    }

    /// Topics with at least one live subscription.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.inner.subscriptions.rooms().active_topics()
    }

    /// The live endpoint this client connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.connection_state())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

fn notification_callback<F>(callback: F) -> Callback
where
    F: Fn(&Notification) + Send + Sync + 'static,
{
    Box::new(move |event| {
        if let InboundEvent::Notification(notification) = event {
            callback(notification);
        }
    })
}
