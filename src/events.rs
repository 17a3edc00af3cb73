//! Lifecycle events
//!
//! Roles publish what happens to their sessions and directories on an
//! [`EventBus`]. Applications subscribe per event kind; any number of
//! handlers may be registered for the same kind and each one is called in
//! subscription order.
//!
//! Handlers run on the role's dispatch task and must not block.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::network::PeerId;
use crate::protocol::ChannelInfo;

/// Event published by a role
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The peer network is up
    NodeInitiated { peer_id: PeerId },

    /// A prism is ready to receive the streamer's offer for `remote`
    ReadyToCast { remote: PeerId },

    /// ICE completed with `remote`
    Completed { remote: PeerId },

    /// A session ended
    Closed { remote: Option<PeerId> },

    ChannelAdded {
        peer_id: PeerId,
        prism_peer_id: PeerId,
        info: Option<ChannelInfo>,
    },

    ChannelRemoved {
        peer_id: PeerId,
        prism_peer_id: PeerId,
    },

    /// A prism sent its full channel list
    ChannelsListUpdated {
        prism_peer_id: PeerId,
        channels: BTreeMap<PeerId, ChannelInfo>,
    },

    /// Viewer-count update from a prism, passed through untouched
    WavesUpdated { prism_peer_id: PeerId, waves: Value },
}

/// Discriminant used to subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeInitiated,
    ReadyToCast,
    Completed,
    Closed,
    ChannelAdded,
    ChannelRemoved,
    ChannelsListUpdated,
    WavesUpdated,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::NodeInitiated { .. } => EventKind::NodeInitiated,
            LifecycleEvent::ReadyToCast { .. } => EventKind::ReadyToCast,
            LifecycleEvent::Completed { .. } => EventKind::Completed,
            LifecycleEvent::Closed { .. } => EventKind::Closed,
            LifecycleEvent::ChannelAdded { .. } => EventKind::ChannelAdded,
            LifecycleEvent::ChannelRemoved { .. } => EventKind::ChannelRemoved,
            LifecycleEvent::ChannelsListUpdated { .. } => EventKind::ChannelsListUpdated,
            LifecycleEvent::WavesUpdated { .. } => EventKind::WavesUpdated,
        }
    }
}

/// Returned by [`EventBus::subscribe`]; pass to `unsubscribe` to remove the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Handler = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

struct Subscriber {
    handle: SubscriptionHandle,
    kind: EventKind,
    handler: Handler,
}

/// Typed publish/subscribe bus
///
/// Cloning yields another handle to the same set of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_handle: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            handle,
            kind,
            handler: Arc::new(handler),
        });
        handle
    }

    /// Remove a handler; returns false if it was already removed
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.handle != handle);
        subscribers.len() != before
    }

    /// Deliver an event to every handler subscribed to its kind
    pub fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        tracing::debug!(event = ?kind, "Lifecycle event");

        // Handlers may subscribe or unsubscribe, so call them outside the lock
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of handlers for `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
