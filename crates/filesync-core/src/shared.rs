//! Shared coordination state: one map and three append-only logs replicated
//! between every peer of a session.
//!
//! The coordinator only sees the `SharedState` trait. Values are JSON strings;
//! `SharedMap` and `SharedLog` give typed views over them.
//!
//! `LoroState` is the reference implementation. The map is a `LoroMap`
//! (last-writer-wins per key) and each log is a `LoroMovableList`, whose `set`
//! gives whole-record replace-by-index. Replicas exchange exported update blobs
//! through a `LoroRelay`, which stands in for the session's relay server.

use crate::PeerId;
use crate::events::{EventBus, Subscription};
use loro::{ExportMode, LoroDoc, LoroValue, ValueOrContainer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, warn};

/// Map holding each peer's fingerprint list, keyed by peer id.
pub const FINGERPRINTS: &str = "fileFingerprints";
/// Log of hold signals.
pub const HOLDS: &str = "holdSignals";
/// Log of sync requests.
pub const REQUESTS: &str = "syncRequests";
/// Log of verification records.
pub const VERIFICATIONS: &str = "syncVerifications";

#[derive(Debug, Error)]
pub enum SharedStateError {
    #[error("Loro error: {0}")]
    Loro(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Index {index} out of range for log {log} (len {len})")]
    OutOfRange {
        log: String,
        index: usize,
        len: usize,
    },
}

pub type Result<T> = std::result::Result<T, SharedStateError>;

/// Where a change to the shared state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Notification that the shared state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Container that changed, `None` when unknown (remote imports)
    pub container: Option<String>,
    pub origin: ChangeOrigin,
}

/// Eventually-consistent replicated map + logs.
pub trait SharedState: Send + Sync {
    fn map_get(&self, map: &str, key: &str) -> Result<Option<String>>;
    fn map_set(&self, map: &str, key: &str, value: String) -> Result<()>;
    fn map_delete(&self, map: &str, key: &str) -> Result<()>;
    fn map_entries(&self, map: &str) -> Result<Vec<(String, String)>>;

    fn log_append(&self, log: &str, record: String) -> Result<()>;
    fn log_update_at(&self, log: &str, index: usize, record: String) -> Result<()>;
    fn log_remove_at(&self, log: &str, index: usize) -> Result<()>;
    fn log_entries(&self, log: &str) -> Result<Vec<String>>;

    /// Register a callback fired on any local or remote mutation.
    fn observe(&self, callback: Box<dyn Fn(StateChange) + Send + Sync>) -> Subscription;

    /// Whether the substrate is initialized and connected.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Typed view of a shared map.
pub struct SharedMap<'a, T> {
    state: &'a dyn SharedState,
    name: &'static str,
    _marker: PhantomData<T>,
}

impl<'a, T: Serialize + DeserializeOwned> SharedMap<'a, T> {
    pub fn new(state: &'a dyn SharedState, name: &'static str) -> Self {
        Self {
            state,
            name,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<T>> {
        match self.state.map_get(self.name, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, value: &T) -> Result<()> {
        self.state
            .map_set(self.name, key, serde_json::to_string(value)?)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.state.map_delete(self.name, key)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .state
            .map_entries(self.name)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Decoded entries; undecodable values are skipped.
    pub fn entries(&self) -> Result<Vec<(String, T)>> {
        let mut entries = Vec::new();
        for (key, raw) in self.state.map_entries(self.name)? {
            match serde_json::from_str(&raw) {
                Ok(value) => entries.push((key, value)),
                Err(e) => warn!("Skipping undecodable entry {} in {}: {}", key, self.name, e),
            }
        }
        Ok(entries)
    }
}

/// Typed view of a shared log.
pub struct SharedLog<'a, T> {
    state: &'a dyn SharedState,
    name: &'static str,
    _marker: PhantomData<T>,
}

impl<'a, T: Serialize + DeserializeOwned> SharedLog<'a, T> {
    pub fn new(state: &'a dyn SharedState, name: &'static str) -> Self {
        Self {
            state,
            name,
            _marker: PhantomData,
        }
    }

    pub fn append(&self, record: &T) -> Result<()> {
        self.state
            .log_append(self.name, serde_json::to_string(record)?)
    }

    pub fn update_at(&self, index: usize, record: &T) -> Result<()> {
        self.state
            .log_update_at(self.name, index, serde_json::to_string(record)?)
    }

    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.state.log_remove_at(self.name, index)
    }

    /// Decoded records with their log index. Undecodable records are skipped
    /// but keep their slot, so returned indices are valid for `update_at`.
    pub fn entries(&self) -> Result<Vec<(usize, T)>> {
        let mut entries = Vec::new();
        for (index, raw) in self.state.log_entries(self.name)?.into_iter().enumerate() {
            match serde_json::from_str(&raw) {
                Ok(record) => entries.push((index, record)),
                Err(e) => warn!("Skipping undecodable record {} in {}: {}", index, self.name, e),
            }
        }
        Ok(entries)
    }

    pub fn records(&self) -> Result<Vec<T>> {
        Ok(self.entries()?.into_iter().map(|(_, r)| r).collect())
    }

    /// Find the first record matching `pred` and replace it with `update(record)`.
    ///
    /// The index is resolved at call time, so it stays correct even if other
    /// peers appended or removed records since the caller last read the log.
    /// Returns the written record, or `None` if nothing matched.
    pub fn update_where(
        &self,
        pred: impl Fn(&T) -> bool,
        update: impl FnOnce(T) -> T,
    ) -> Result<Option<T>>
    where
        T: Clone,
    {
        let Some((index, record)) = self.entries()?.into_iter().find(|(_, r)| pred(r)) else {
            return Ok(None);
        };
        let updated = update(record);
        self.update_at(index, &updated)?;
        Ok(Some(updated))
    }
}

// ============================================================================
// Loro-backed implementation
// ============================================================================

/// One replica of the shared coordination state, backed by a loro document.
pub struct LoroState {
    doc: Mutex<LoroDoc>,
    changes: Arc<EventBus<StateChange>>,
    relay: RwLock<Option<Weak<LoroRelay>>>,
    ready: AtomicBool,
}

impl LoroState {
    /// Create a replica whose loro peer id is the participant's id.
    pub fn new(peer_id: PeerId) -> Result<Arc<Self>> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id.as_u64())
            .map_err(|e| SharedStateError::Loro(e.to_string()))?;
        Ok(Arc::new(Self {
            doc: Mutex::new(doc),
            changes: Arc::new(EventBus::new()),
            relay: RwLock::new(None),
            ready: AtomicBool::new(true),
        }))
    }

    /// Mark the replica as (not) ready, e.g. while the session is still connecting.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Full snapshot of this replica.
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.lock_doc()
            .export(ExportMode::Snapshot)
            .map_err(|e| SharedStateError::Loro(e.to_string()))
    }

    /// Merge updates (or a snapshot) from another replica.
    pub fn import(&self, data: &[u8]) -> Result<()> {
        self.lock_doc()
            .import(data)
            .map_err(|e| SharedStateError::Loro(e.to_string()))?;
        self.changes.emit(StateChange {
            container: None,
            origin: ChangeOrigin::Remote,
        });
        Ok(())
    }

    fn lock_doc(&self) -> std::sync::MutexGuard<'_, LoroDoc> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn relay(&self) -> Option<Arc<LoroRelay>> {
        self.relay
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Apply a local mutation, commit it, notify observers and forward the
    /// resulting update to the relay.
    fn mutate(
        &self,
        container: &str,
        f: impl FnOnce(&LoroDoc) -> Result<()>,
    ) -> Result<()> {
        let update = {
            let doc = self.lock_doc();
            let before = doc.oplog_vv();
            f(&*doc)?;
            doc.commit();
            doc.export(ExportMode::updates(&before))
                .map_err(|e| SharedStateError::Loro(e.to_string()))?
        };

        self.changes.emit(StateChange {
            container: Some(container.to_string()),
            origin: ChangeOrigin::Local,
        });

        if let Some(relay) = self.relay() {
            relay.forward(self, update);
        }
        Ok(())
    }

    fn read_string(value: &LoroValue) -> Option<String> {
        match value {
            LoroValue::String(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

fn loro_err(e: impl std::fmt::Display) -> SharedStateError {
    SharedStateError::Loro(e.to_string())
}

impl SharedState for LoroState {
    fn map_get(&self, map: &str, key: &str) -> Result<Option<String>> {
        let doc = self.lock_doc();
        let value = doc.get_map(map).get(key).and_then(|v| {
            if let ValueOrContainer::Value(val) = v {
                val.as_string().map(|s| s.to_string())
            } else {
                None
            }
        });
        Ok(value)
    }

    fn map_set(&self, map: &str, key: &str, value: String) -> Result<()> {
        self.mutate(map, |doc| doc.get_map(map).insert(key, value).map_err(loro_err))
    }

    fn map_delete(&self, map: &str, key: &str) -> Result<()> {
        self.mutate(map, |doc| doc.get_map(map).delete(key).map_err(loro_err))
    }

    fn map_entries(&self, map: &str) -> Result<Vec<(String, String)>> {
        let doc = self.lock_doc();
        let mut entries = Vec::new();
        if let LoroValue::Map(values) = doc.get_map(map).get_deep_value() {
            for (key, value) in values.iter() {
                if let Some(s) = Self::read_string(value) {
                    entries.push((key.to_string(), s));
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn log_append(&self, log: &str, record: String) -> Result<()> {
        self.mutate(log, |doc| {
            doc.get_movable_list(log).push(record).map_err(loro_err)
        })
    }

    fn log_update_at(&self, log: &str, index: usize, record: String) -> Result<()> {
        self.mutate(log, |doc| {
            let list = doc.get_movable_list(log);
            let len = list.len();
            if index >= len {
                return Err(SharedStateError::OutOfRange {
                    log: log.to_string(),
                    index,
                    len,
                });
            }
            list.set(index, record).map_err(loro_err)
        })
    }

    fn log_remove_at(&self, log: &str, index: usize) -> Result<()> {
        self.mutate(log, |doc| {
            let list = doc.get_movable_list(log);
            let len = list.len();
            if index >= len {
                return Err(SharedStateError::OutOfRange {
                    log: log.to_string(),
                    index,
                    len,
                });
            }
            list.delete(index, 1).map_err(loro_err)
        })
    }

    fn log_entries(&self, log: &str) -> Result<Vec<String>> {
        let doc = self.lock_doc();
        let mut entries = Vec::new();
        if let LoroValue::List(values) = doc.get_movable_list(log).get_deep_value() {
            for value in values.iter() {
                // Non-string slots become empty strings so indices stay aligned
                entries.push(Self::read_string(value).unwrap_or_default());
            }
        }
        Ok(entries)
    }

    fn observe(&self, callback: Box<dyn Fn(StateChange) + Send + Sync>) -> Subscription {
        self.changes.subscribe(move |change| callback(change))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// In-process relay that replicates updates between `LoroState` replicas.
///
/// Delivery is immediate unless the relay is paused, in which case updates
/// queue until `resume` (used to exercise out-of-order observation in tests).
#[derive(Default)]
pub struct LoroRelay {
    members: RwLock<Vec<Weak<LoroState>>>,
    paused: AtomicBool,
    queue: Mutex<Vec<(usize, Vec<u8>)>>,
}

impl LoroRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a replica and bring it and every existing member up to date.
    pub fn join(self: &Arc<Self>, state: &Arc<LoroState>) -> Result<()> {
        let existing: Vec<Arc<LoroState>> = self.live_members();

        for member in &existing {
            state.import(&member.export_snapshot()?)?;
        }
        let snapshot = state.export_snapshot()?;
        for member in &existing {
            member.import(&snapshot)?;
        }

        *state.relay.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(self));
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(state));
        debug!("Relay joined replica ({} members)", existing.len() + 1);
        Ok(())
    }

    /// Detach a replica. It keeps its local state but stops replicating.
    pub fn leave(&self, state: &LoroState) {
        *state.relay.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|m| m.upgrade().is_some_and(|m| !std::ptr::eq(Arc::as_ptr(&m), state)));
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume delivery and flush queued updates in order.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let queued = std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()));
        let members = self.live_members();
        for (from, update) in queued {
            for member in &members {
                if Arc::as_ptr(member) as usize != from {
                    if let Err(e) = member.import(&update) {
                        warn!("Relay failed to deliver queued update: {}", e);
                    }
                }
            }
        }
    }

    fn live_members(&self) -> Vec<Arc<LoroState>> {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn forward(&self, from: &LoroState, update: Vec<u8>) {
        let from_addr = from as *const LoroState as usize;
        if self.paused.load(Ordering::SeqCst) {
            self.queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((from_addr, update));
            return;
        }
        for member in self.live_members() {
            if Arc::as_ptr(&member) as usize == from_addr {
                continue;
            }
            if let Err(e) = member.import(&update) {
                warn!("Relay failed to deliver update: {}", e);
            }
        }
    }
}
