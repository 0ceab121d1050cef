//! Local sync session: one participant per synced directory.
//!
//! Every participant gets a directory-backed store, its own loro replica and
//! a coordinator. Replicas are joined through an in-process relay and share
//! one transfer service and presence registry. Observer callbacks only push
//! a `Signal`; the owner of the session feeds signals back through `handle`
//! so coordinators are always driven from one task.

use crate::native_store::NativeStore;
use filesync_core::{
    Capabilities, ChangeOrigin, CoordinatorError, CycleOutcome, FileStore, LoroRelay, LoroState,
    MemoryTransfer, PeerId, PeerIdentity, PeerRegistry, SharedState, SharedStateError, StoreError,
    Subscription, SyncConfig, SyncCoordinator, SyncNotification, SyncStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shared state error: {0}")]
    State(#[from] SharedStateError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Wake-up produced by an observer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Another replica's change reached this participant's shared state
    StateChanged(usize),
    /// This participant's store was written
    LocalChange(usize),
}

pub struct Participant {
    pub identity: PeerIdentity,
    pub root: PathBuf,
    pub store: Arc<NativeStore>,
    pub state: Arc<LoroState>,
    pub coordinator: SyncCoordinator,
    _subscriptions: Vec<Subscription>,
}

pub struct LocalSession {
    config: SyncConfig,
    relay: Arc<LoroRelay>,
    transfer: Arc<MemoryTransfer>,
    registry: Arc<PeerRegistry>,
    participants: Vec<Participant>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
}

impl LocalSession {
    pub fn new(config: SyncConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            relay: LoroRelay::new(),
            transfer: Arc::new(MemoryTransfer::new()),
            registry: Arc::new(PeerRegistry::new()),
            participants: Vec::new(),
            signal_tx,
            signal_rx,
        }
    }

    /// Add a directory to the session and enable its coordinator.
    /// Returns the participant's index.
    pub async fn join(&mut self, root: PathBuf, now: u64) -> Result<usize> {
        let index = self.participants.len();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("dir-{index}"));
        let identity = PeerIdentity::new(PeerId::generate(), name);

        let store = Arc::new(NativeStore::open(root.clone()).await?);
        let state = LoroState::new(identity.id)?;
        self.relay.join(&state)?;
        self.registry.peer_connected(identity.id, identity.name.clone(), now);

        let caps = Capabilities {
            state: state.clone(),
            store: store.clone(),
            transfer: self.transfer.clone(),
            presence: self.registry.clone(),
        };
        let coordinator = SyncCoordinator::new(identity.clone(), self.config.clone(), caps)?;

        let tx = self.signal_tx.clone();
        let state_sub = state.observe(Box::new(move |change| {
            if change.origin == ChangeOrigin::Remote {
                let _ = tx.send(Signal::StateChanged(index));
            }
        }));
        let tx = self.signal_tx.clone();
        let store_sub = store.on_change(Box::new(move |_| {
            let _ = tx.send(Signal::LocalChange(index));
        }));
        let peer_name = identity.name.clone();
        let notification_sub = coordinator.subscribe(move |notification| {
            log_notification(&peer_name, &notification);
        });

        coordinator.enable(now).await;
        info!("{} joined the session as {} ({:?})", identity.name, identity.id, root);

        self.participants.push(Participant {
            identity,
            root,
            store,
            state,
            coordinator,
            _subscriptions: vec![state_sub, store_sub, notification_sub],
        });
        Ok(index)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, index: usize) -> Option<&Participant> {
        self.participants.get(index)
    }

    /// Wait for the next observer signal.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.signal_rx.recv().await
    }

    /// Act on one signal.
    pub async fn handle(&self, signal: Signal, now: u64) -> Result<()> {
        match signal {
            Signal::StateChanged(index) => {
                if let Some(participant) = self.participants.get(index) {
                    participant.coordinator.on_state_changed(now).await?;
                }
            }
            Signal::LocalChange(index) => self.local_change(index, now).await,
        }
        Ok(())
    }

    /// The watcher saw a change under a participant's directory.
    pub async fn local_change(&self, index: usize, now: u64) {
        if let Some(participant) = self.participants.get(index) {
            participant.coordinator.on_local_change(now).await;
        }
    }

    /// Handle every signal already queued, including ones raised while
    /// handling. Returns how many were handled.
    pub async fn drain(&mut self, now: u64) -> Result<usize> {
        let mut handled = 0;
        while let Ok(signal) = self.signal_rx.try_recv() {
            self.handle(signal, now).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Drive every coordinator's timers. Errors are logged per participant.
    pub async fn tick(&self, now: u64) {
        for participant in &self.participants {
            match participant.coordinator.tick(now).await {
                Ok(Some(CycleOutcome::Completed(report))) => {
                    debug!("{}: cycle completed {:?}", participant.identity.name, report);
                }
                Ok(Some(CycleOutcome::Skipped(reason))) => {
                    debug!("{}: cycle skipped ({:?})", participant.identity.name, reason);
                }
                Ok(None) => {}
                Err(e) => warn!("{}: sync tick failed: {}", participant.identity.name, e),
            }
        }
    }

    pub async fn statuses(&self) -> Vec<SyncStatus> {
        let mut statuses = Vec::with_capacity(self.participants.len());
        for participant in &self.participants {
            statuses.push(participant.coordinator.status().await);
        }
        statuses
    }

    /// Disable every coordinator and mark every participant disconnected.
    pub async fn shutdown(&self, now: u64) {
        for participant in &self.participants {
            if let Err(e) = participant.coordinator.disable().await {
                warn!("{}: failed to disable sync: {}", participant.identity.name, e);
            }
            self.registry.peer_disconnected(participant.identity.id, now);
        }
    }
}

fn log_notification(peer: &str, notification: &SyncNotification) {
    match notification {
        SyncNotification::FilesReceived {
            provider_id, paths, ..
        } => info!("{}: received {} file(s) from {}", peer, paths.len(), provider_id),
        SyncNotification::RequestServed {
            requester_id,
            file_count,
            ..
        } => info!("{}: served {} file(s) to {}", peer, file_count, requester_id),
        SyncNotification::SyncFailed {
            peer_id, message, ..
        } => warn!("{}: sync with {} failed: {}", peer, peer_id, message),
        SyncNotification::PeerDisabled {
            peer_id, failures, ..
        } => warn!(
            "{}: sync with {} disabled after {} consecutive failures",
            peer, peer_id, failures
        ),
        SyncNotification::PeerReenabled { peer_id, .. } => {
            info!("{}: sync with {} re-enabled", peer, peer_id)
        }
        SyncNotification::ConflictDetected { peer_id, path, .. } => {
            warn!("{}: {} differs from {}'s copy", peer, path, peer_id)
        }
        SyncNotification::PeersPruned { peer_ids, .. } => {
            debug!("{}: pruned {} departed peer(s)", peer, peer_ids.len())
        }
    }
}
