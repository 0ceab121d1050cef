//! Event infrastructure for filesync-core.
//!
//! `EventBus<E>` is a typed observer list used for coordinator notifications,
//! shared-state change notifications and local-store change notifications.
//! `SyncNotification` is what the coordinator reports to the UI layer.

use crate::PeerId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted by a `SyncCoordinator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncNotification {
    /// Files pulled from a provider were applied locally.
    #[serde(rename_all = "camelCase")]
    FilesReceived {
        provider_id: PeerId,
        paths: Vec<String>,
        timestamp: u64,
    },
    /// We staged files for a requester.
    #[serde(rename_all = "camelCase")]
    RequestServed {
        requester_id: PeerId,
        request_id: String,
        file_count: usize,
        timestamp: u64,
    },
    /// A transfer with a peer failed.
    #[serde(rename_all = "camelCase")]
    SyncFailed {
        peer_id: PeerId,
        request_id: String,
        message: String,
        timestamp: u64,
    },
    /// Too many consecutive failures; sync with the peer is off until re-enabled.
    #[serde(rename_all = "camelCase")]
    PeerDisabled {
        peer_id: PeerId,
        failures: u32,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    PeerReenabled { peer_id: PeerId, timestamp: u64 },
    /// Content differs and the `notify` strategy left it for the user.
    #[serde(rename_all = "camelCase")]
    ConflictDetected {
        peer_id: PeerId,
        path: String,
        timestamp: u64,
    },
    /// Fingerprints of departed peers were removed.
    #[serde(rename_all = "camelCase")]
    PeersPruned { peer_ids: Vec<PeerId>, timestamp: u64 },
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Thread-safe event bus. Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Weak<EventBus<E>> = Arc::downgrade(self);
        Subscription { bus, id }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E: 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }
}
