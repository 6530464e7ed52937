#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::{DashMap, Entry};

use super::interest::InterestTracker;
use super::rooms::RoomTracker;
use super::types::request::Topic;
use super::types::response::{EventKind, InboundEvent};
use crate::ws::WsError;
use crate::ws::traits::{Outbound, Session};

/// Callback invoked with every matching event.
pub type Callback = Box<dyn Fn(&InboundEvent) + Send + Sync>;

/// Information about an active subscription.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Identifier, unique within one client
    pub id: u64,
    /// Topic the subscription listens on
    pub topic: Topic,
    /// Event kind the subscription listens for
    pub kind: EventKind,
    /// When the subscription was created
    pub created_at: Instant,
}

struct Registration {
    info: SubscriptionInfo,
    active: AtomicBool,
    callback: Callback,
}

impl Registration {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Handle of one registered callback.
///
/// Dropping the handle cancels the subscription. Cancelling is idempotent, and a cancelled
/// callback is never invoked again, even for an event whose dispatch is already under way.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    registration: Arc<Registration>,
    manager: Weak<SubscriptionManager>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.registration.info.id
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.registration.info.topic
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.registration.info.kind
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    /// Stop delivery to this callback and release its topic.
    pub fn cancel(&self) {
        if !self.registration.active.swap(false, Ordering::AcqRel) {
            return;
        }

        // A gone manager means the client was dropped along with its rooms.
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(&self.registration);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("topic", self.topic())
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Callback registry and event router.
///
/// Registrations are kept per topic in registration order. Each subscription holds one
/// reference on its topic in the [`RoomTracker`], so room membership on the wire follows the
/// set of live subscriptions.
pub struct SubscriptionManager {
    registry: DashMap<Topic, Vec<Arc<Registration>>>,
    rooms: RoomTracker,
    interest: Arc<InterestTracker>,
    next_id: AtomicU64,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(interest: Arc<InterestTracker>) -> Self {
        Self {
            registry: DashMap::new(),
            rooms: RoomTracker::new(),
            interest,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for events of `kind` on `topic`.
    ///
    /// The topic's room is joined right away when connected, otherwise on the next connect.
    pub fn subscribe(self: &Arc<Self>, topic: Topic, kind: EventKind, callback: Callback) -> Subscription {
        let registration = Arc::new(Registration {
            info: SubscriptionInfo {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                topic: topic.clone(),
                kind,
                created_at: Instant::now(),
            },
            active: AtomicBool::new(true),
            callback,
        });

        self.interest.add(kind.into());
        self.registry
            .entry(topic.clone())
            .or_default()
            .push(Arc::clone(&registration));
        self.rooms.add_ref(&topic);

        #[cfg(feature = "tracing")]
        tracing::debug!(id = registration.info.id, %topic, %kind, "Subscribed");

        Subscription {
            registration,
            manager: Arc::downgrade(self),
        }
    }

    fn remove(&self, registration: &Registration) {
        let topic = &registration.info.topic;
        if let Entry::Occupied(mut entry) = self.registry.entry(topic.clone()) {
            entry
                .get_mut()
                .retain(|other| other.info.id != registration.info.id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        self.rooms.release(topic);

        #[cfg(feature = "tracing")]
        tracing::debug!(id = registration.info.id, %topic, "Subscription cancelled");
    }

    /// Invoke every live callback registered for the event's topic and kind.
    ///
    /// Callbacks run in registration order on the calling task. A panicking callback is logged
    /// and skipped.
    pub fn dispatch(&self, event: &InboundEvent) {
        let topic = event.topic();
        let kind = event.kind();

        // Clone the list so no shard lock is held while callbacks run.
        let Some(registrations) = self.registry.get(&topic).map(|entry| entry.value().clone())
        else {
            #[cfg(feature = "tracing")]
            tracing::trace!(%topic, %kind, "No subscribers for event");
            return;
        };

        for registration in registrations.iter().filter(|r| r.info.kind == kind) {
            if !registration.is_active() {
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (registration.callback)(event)));
            if let Err(payload) = outcome {
                let error = WsError::CallbackPanicked {
                    subscription: registration.info.id,
                    message: panic_message(payload.as_ref()),
                };

                #[cfg(feature = "tracing")]
                tracing::error!(error = %error, %topic, %kind, "Subscriber callback failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
            }
        }
    }

    /// Number of live subscriptions, connected or not.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.iter().map(|entry| entry.value().len()).sum()
    }

    /// Live subscriptions ordered by id.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .registry
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|registration| registration.info.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomTracker {
        &self.rooms
    }
}

impl Session<InboundEvent> for SubscriptionManager {
    fn opened(&self, outbound: &Outbound) {
        self.rooms.opened(outbound);
    }

    fn closed(&self, outbound: &Outbound) {
        self.rooms.closed(outbound);
    }

    fn deliver(&self, message: InboundEvent) {
        self.dispatch(&message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
