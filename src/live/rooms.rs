use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::request::{ControlFrame, Topic};
use crate::ws::traits::Outbound;

/// Topic table and the link it is mirrored on. Kept under one lock so the count transition and
/// the decision to send a frame are never observed apart.
#[derive(Debug, Default)]
struct Rooms {
    counts: HashMap<Topic, usize>,
    link: Option<Outbound>,
}

/// Reference-counted room membership.
///
/// A room is joined on its first reference and left when the last one is released. While no
/// transport is open nothing is sent; [`RoomTracker::opened`] joins every referenced room once
/// the next transport comes up.
#[derive(Debug, Default)]
pub struct RoomTracker {
    rooms: Mutex<Rooms>,
}

impl RoomTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rooms> {
        // Every mutation completes before any frame is queued, so a poisoned table is consistent.
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on `topic`, joining its room if this is the first one.
    pub fn add_ref(&self, topic: &Topic) {
        let mut rooms = self.lock();
        let count = rooms.counts.entry(topic.clone()).or_insert(0);
        *count += 1;
        let first = *count == 1;

        if first {
            #[cfg(feature = "tracing")]
            tracing::debug!(%topic, connected = rooms.link.is_some(), "First reference on topic");

            if let Some(link) = &rooms.link {
                send_frame(link, ControlFrame::join(topic));
            }
        }
    }

    /// Drop a reference on `topic`, leaving its room when none remain.
    ///
    /// Releasing a topic that holds no reference does nothing.
    pub fn release(&self, topic: &Topic) {
        let mut rooms = self.lock();
        let Some(count) = rooms.counts.get_mut(topic) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }

        rooms.counts.remove(topic);

        #[cfg(feature = "tracing")]
        tracing::debug!(%topic, connected = rooms.link.is_some(), "Last reference on topic released");

        if let Some(link) = &rooms.link {
            send_frame(link, ControlFrame::leave(topic));
        }
    }

    /// Attach a freshly opened transport and join every referenced room on it.
    pub fn opened(&self, link: &Outbound) {
        let mut rooms = self.lock();
        rooms.link = Some(link.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(topics = rooms.counts.len(), "Rejoining rooms on new transport");

        for topic in rooms.counts.keys() {
            send_frame(link, ControlFrame::join(topic));
        }
    }

    /// Detach `link` if it is still the current transport. No leave frames are sent.
    pub fn closed(&self, link: &Outbound) {
        let mut rooms = self.lock();
        if rooms
            .link
            .as_ref()
            .is_some_and(|current| current.same_session(link))
        {
            rooms.link = None;
        }
    }

    /// Topics that currently hold at least one reference.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.lock().counts.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of references on `topic`, zero when unknown.
    #[must_use]
    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.lock().counts.get(topic).copied().unwrap_or(0)
    }

    /// Whether a transport is currently attached.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.lock().link.is_some()
    }
}

/// Queue `frame` on `link`. Broadcast topics have no frame.
fn send_frame(link: &Outbound, frame: Option<ControlFrame>) {
    let Some(frame) = frame else {
        return;
    };

    if let Err(e) = link.send(&frame) {
        // The transport is going away; `opened` will rejoin on the next one.
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %e, event = %frame.event, room = %frame.data, "Dropping control frame");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}
