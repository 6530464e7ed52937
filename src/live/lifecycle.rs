use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::interest::InterestTracker;
use super::types::response::InboundEvent;
use crate::auth::Credential;
use crate::ws::WsError;
use crate::ws::connection::{ConnectionManager, RejectionHandler};

/// The connection type used by the live client.
pub type LiveConnection = ConnectionManager<InboundEvent, Arc<InterestTracker>>;

/// Application callback run after the server refused the credential.
pub type ForcedLogoutHandler = Arc<dyn Fn(&WsError) + Send + Sync>;

/// Ties the connection to the login state of the application.
///
/// Login opens the connection, logout closes it, and a credential the server refuses is
/// turned into a forced logout the application can react to.
pub struct LifecycleBinder {
    connection: Arc<LiveConnection>,
    forced_logout: Arc<RwLock<Option<ForcedLogoutHandler>>>,
}

impl LifecycleBinder {
    #[must_use]
    pub fn new(connection: Arc<LiveConnection>) -> Self {
        Self {
            connection,
            forced_logout: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the callback run on forced logout, replacing any previous one.
    pub fn on_forced_logout(&self, handler: ForcedLogoutHandler) {
        // Option<Arc<_>> has no intermediate state, so a poisoned lock is still usable.
        *self
            .forced_logout
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Connect with `credential` unless a session is already running.
    ///
    /// Returns `true` when a new connection was started.
    pub fn credential_available(&self, credential: Credential) -> bool {
        let started = self
            .connection
            .init(credential, self.rejection_handler());

        #[cfg(feature = "tracing")]
        if !started {
            tracing::debug!("Credential supplied while a session is running, ignoring");
        }

        started
    }

    /// Close the connection. Subscriptions stay registered until the next login.
    pub fn credential_withdrawn(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Credential withdrawn, disconnecting");

        self.connection.disconnect();
    }

    fn rejection_handler(&self) -> RejectionHandler {
        // Weak, since the connection task owns this handler for as long as it runs.
        let connection: Weak<LiveConnection> = Arc::downgrade(&self.connection);
        let forced_logout = Arc::clone(&self.forced_logout);

        Arc::new(move |error: &WsError| {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "Forced logout");

            if let Some(connection) = connection.upgrade() {
                connection.disconnect();
            }

            let handler = forced_logout
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(handler) = handler {
                handler(error);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::live::subscription::SubscriptionManager;
    use crate::ws::config::Config;
    use crate::ws::connection::ConnectionState;

    fn binder() -> LifecycleBinder {
        let interest = Arc::new(InterestTracker::new());
        let session = Arc::new(SubscriptionManager::new(Arc::clone(&interest)));
        let connection =
            LiveConnection::new("ws://127.0.0.1:1/live", Config::default(), interest, session)
                .unwrap();
        LifecycleBinder::new(Arc::new(connection))
    }

    #[tokio::test]
    async fn repeated_login_is_noop() {
        let binder = binder();

        assert!(binder.credential_available(Credential::from("first")));
        assert!(!binder.credential_available(Credential::from("second")));

        binder.credential_withdrawn();
        assert_eq!(binder.connection.state(), ConnectionState::Disconnected);
        assert!(binder.credential_available(Credential::from("third")));
        binder.credential_withdrawn();
    }

    #[test]
    fn rejection_runs_forced_logout_once_per_call() {
        let binder = binder();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        binder.on_forced_logout(Arc::new(move |error| {
            assert!(error.is_fatal());
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let handler = binder.rejection_handler();
        handler(&WsError::AuthenticationRejected {
            status: None,
            close_code: Some(4401),
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!binder.connection.is_connected());
    }

    #[test]
    fn rejection_without_handler_still_disconnects() {
        let binder = binder();

        let handler = binder.rejection_handler();
        handler(&WsError::AuthenticationRejected {
            status: None,
            close_code: Some(1008),
        });

        assert_eq!(binder.connection.state(), ConnectionState::Disconnected);
    }
}
