//! Presence: which peers are currently part of the session.
//!
//! The coordinator only asks `Presence::live_peer_ids`. `PeerRegistry` is the
//! bundled implementation, fed by whoever owns the session's connections.

use crate::PeerId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Source of the live participant set.
pub trait Presence: Send + Sync {
    /// Ids of the live participants, or `None` when presence is unavailable.
    fn live_peer_ids(&self) -> Option<HashSet<PeerId>>;
}

/// Connection state for a peer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Tracked state for a peer in the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPeer {
    pub id: PeerId,
    pub name: String,
    pub state: ConnectionState,
    /// When first seen this session (ms since epoch)
    pub first_seen: u64,
    /// When last activity observed (ms since epoch)
    pub last_seen: u64,
    /// Times this peer has connected this session
    pub connection_count: u32,
}

/// Registry for tracking session participants.
///
/// Thread-safe; wrap in `Arc` for shared ownership.
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, KnownPeer>>,
    available: AtomicBool,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. A known peer that reconnects gets its
    /// connection count bumped; a duplicate connect only refreshes activity.
    pub fn peer_connected(&self, id: PeerId, name: impl Into<String>, timestamp: u64) -> KnownPeer {
        let name = name.into();
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());

        let peer = peers.entry(id).or_insert_with(|| KnownPeer {
            id,
            name: name.clone(),
            state: ConnectionState::Disconnected,
            first_seen: timestamp,
            last_seen: timestamp,
            connection_count: 0,
        });
        if peer.state != ConnectionState::Connected {
            peer.state = ConnectionState::Connected;
            peer.connection_count += 1;
        }
        peer.name = name;
        peer.last_seen = timestamp;
        peer.clone()
    }

    /// Mark peer as disconnected (keeps it in the registry).
    pub fn peer_disconnected(&self, id: PeerId, timestamp: u64) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get_mut(&id) {
            Some(peer) => {
                peer.state = ConnectionState::Disconnected;
                peer.last_seen = timestamp;
                true
            }
            None => false,
        }
    }

    /// Simulate presence going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All peers seen this session.
    pub fn known_peers(&self) -> Vec<KnownPeer> {
        let mut peers: Vec<_> = self
            .peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    pub fn get_peer(&self, id: PeerId) -> Option<KnownPeer> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn is_connected(&self, id: PeerId) -> bool {
        self.get_peer(id)
            .is_some_and(|p| p.state == ConnectionState::Connected)
    }
}

impl Presence for PeerRegistry {
    fn live_peer_ids(&self) -> Option<HashSet<PeerId>> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        Some(
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .filter(|p| p.state == ConnectionState::Connected)
                .map(|p| p.id)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_disconnect() {
        let registry = PeerRegistry::new();
        let a = PeerId::from(1);

        let peer = registry.peer_connected(a, "alice", 100);
        assert_eq!(peer.connection_count, 1);
        assert!(registry.is_connected(a));

        // Duplicate connect is idempotent
        let peer = registry.peer_connected(a, "alice", 150);
        assert_eq!(peer.connection_count, 1);
        assert_eq!(peer.last_seen, 150);

        assert!(registry.peer_disconnected(a, 200));
        assert!(!registry.is_connected(a));
        assert!(!registry.peer_disconnected(PeerId::from(9), 200));

        let peer = registry.peer_connected(a, "alice", 300);
        assert_eq!(peer.connection_count, 2);
        assert_eq!(peer.first_seen, 100);
    }

    #[test]
    fn test_live_peer_ids() {
        let registry = PeerRegistry::new();
        registry.peer_connected(PeerId::from(1), "a", 0);
        registry.peer_connected(PeerId::from(2), "b", 0);
        registry.peer_disconnected(PeerId::from(2), 1);

        let live = registry.live_peer_ids().unwrap();
        assert_eq!(live, [PeerId::from(1)].into_iter().collect());
        assert_eq!(registry.known_peers().len(), 2);

        registry.set_available(false);
        assert!(registry.live_peer_ids().is_none());
    }
}
