//! `SyncCoordinator`: one peer's view of the sync protocol.
//!
//! The coordinator owns every piece of local protocol state (hold markers,
//! failure counters, idempotency sets, schedule, notification history) and
//! holds `Arc` handles to the injected capabilities. All operations take the
//! coordinator's async mutex, so nothing interleaves within one peer.
//!
//! The host drives it:
//! - `tick(now)` on a short repeating timer
//! - `on_local_change(now)` when the local store reports a change
//! - `on_state_changed(now)` when the shared state reports a change
//!
//! Observer callbacks (store, shared state, notifications) must never call
//! back into the coordinator; they should only signal the host's loop.

use crate::config::{ConfigError, ConflictStrategy, SyncConfig};
use crate::events::{EventBus, Subscription, SyncNotification};
use crate::failure::{FailureTracker, record_verification, take_new_successes};
use crate::fingerprint::{self, FingerprintError, prune_departed, remote_fingerprints};
use crate::gc::{self, SweepReport};
use crate::hold::HoldCoordinator;
use crate::negotiator::{self, Downloaded, Negotiator, Served, build_request};
use crate::presence::Presence;
use crate::records::{FileFingerprint, SyncRequest, VerificationRecord};
use crate::scanner::{compute_conflicts, compute_targets, compute_triggers};
use crate::shared::{SharedLog, SharedState, SharedStateError, VERIFICATIONS};
use crate::store::FileStore;
use crate::transfer::BulkTransfer;
use crate::{PeerId, PeerIdentity};
use futures::lock::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Notifications kept for `notifications()`.
const HISTORY_LIMIT: usize = 100;

/// Delay between `enable` and the first cycle.
const FIRST_CYCLE_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Shared state error: {0}")]
    State(#[from] SharedStateError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// External collaborators of one peer.
#[derive(Clone)]
pub struct Capabilities {
    pub state: Arc<dyn SharedState>,
    pub store: Arc<dyn FileStore>,
    pub transfer: Arc<dyn BulkTransfer>,
    pub presence: Arc<dyn Presence>,
}

/// Why a cycle didn't run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Auto-sync is off
    Disabled,
    /// The shared state isn't initialized or connected yet
    NotReady,
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fingerprint keys removed for departed peers
    pub pruned_peers: Vec<String>,
    pub sweep: SweepReport,
    pub timed_out_requests: usize,
    /// Number of fingerprints published
    pub published: usize,
    pub peers_scanned: usize,
    pub requests_issued: usize,
    pub requests_queued: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

/// Snapshot of the coordinator for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub peer: PeerId,
    pub enabled: bool,
    pub last_sync_timestamp: Option<u64>,
    pub disabled_peers: Vec<PeerId>,
    pub held_targets: Vec<PeerId>,
    pub queued_requests: usize,
    pub published_files: usize,
}

struct Inner {
    enabled: bool,
    next_cycle_at: Option<u64>,
    publish_due_at: Option<u64>,
    last_sync: Option<u64>,
    /// Latest clock value seen by any operation
    last_now: u64,
    published_files: usize,
    holds: HoldCoordinator,
    failures: FailureTracker,
    negotiator: Negotiator,
    /// (peer, path, remote checksum) already reported under `notify`
    reported_conflicts: HashSet<(PeerId, String, String)>,
    /// Success verifications of served requests already acted on
    acknowledged: HashSet<String>,
}

impl Inner {
    fn observe_clock(&mut self, now: u64) {
        self.last_now = self.last_now.max(now);
    }
}

/// Coordinates file sync for one participant of a session.
pub struct SyncCoordinator {
    identity: PeerIdentity,
    config: SyncConfig,
    caps: Capabilities,
    inner: Mutex<Inner>,
    bus: Arc<EventBus<SyncNotification>>,
    history: std::sync::Mutex<VecDeque<SyncNotification>>,
}

impl SyncCoordinator {
    /// Create a disabled coordinator. Call `enable` to start syncing.
    pub fn new(identity: PeerIdentity, config: SyncConfig, caps: Capabilities) -> Result<Self> {
        config.validate()?;
        let failures = FailureTracker::new(config.max_consecutive_failures);
        Ok(Self {
            identity,
            config,
            caps,
            inner: Mutex::new(Inner {
                enabled: false,
                next_cycle_at: None,
                publish_due_at: None,
                last_sync: None,
                last_now: 0,
                published_files: 0,
                holds: HoldCoordinator::new(),
                failures,
                negotiator: Negotiator::new(),
                reported_conflicts: HashSet::new(),
                acknowledged: HashSet::new(),
            }),
            bus: Arc::new(EventBus::new()),
            history: std::sync::Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        })
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ========================================================================
    // Produced interface
    // ========================================================================

    /// Turn auto-sync on. The first cycle runs shortly after.
    pub async fn enable(&self, now: u64) {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        if inner.enabled {
            return;
        }
        inner.enabled = true;
        inner.next_cycle_at = Some(now + FIRST_CYCLE_DELAY_MS.min(self.config.auto_sync_interval_ms()));
        info!("Sync enabled for {} ({})", self.identity.name, self.identity.id);
    }

    /// Turn auto-sync off. Requests not yet issued are dropped and their
    /// holds released.
    pub async fn disable(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.enabled {
            return Ok(());
        }
        inner.enabled = false;
        inner.next_cycle_at = None;
        inner.publish_due_at = None;

        let state = self.caps.state.as_ref();
        for request in inner.negotiator.drain_queue() {
            inner
                .holds
                .release(state, self.identity.id, &request.hold_signal_id)?;
        }
        info!("Sync disabled for {} ({})", self.identity.name, self.identity.id);
        Ok(())
    }

    /// Run a cycle now, regardless of the interval.
    pub async fn request_sync_now(&self, now: u64) -> Result<CycleOutcome> {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        if !inner.enabled {
            return Ok(CycleOutcome::Skipped(SkipReason::Disabled));
        }
        self.run_cycle(&mut inner, now).await
    }

    /// Notification history, oldest first.
    pub fn notifications(&self) -> Vec<SyncNotification> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Subscribe to notifications. Drop the returned handle to unsubscribe.
    pub fn subscribe(
        &self,
        callback: impl Fn(SyncNotification) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(callback)
    }

    pub async fn last_sync_timestamp(&self) -> Option<u64> {
        self.inner.lock().await.last_sync
    }

    // ========================================================================
    // Drivers
    // ========================================================================

    /// Flush due requests, run a debounced publish and run a cycle if the
    /// interval has elapsed.
    pub async fn tick(&self, now: u64) -> Result<Option<CycleOutcome>> {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        if !inner.enabled {
            return Ok(None);
        }

        if inner.next_cycle_at.is_some_and(|at| at <= now) {
            return self.run_cycle(&mut inner, now).await.map(Some);
        }

        if !self.caps.state.is_ready() {
            return Ok(None);
        }
        self.flush_queue(&mut inner, now)?;
        if inner.publish_due_at.is_some_and(|at| at <= now) {
            self.publish_local(&mut inner).await?;
        }
        Ok(None)
    }

    /// The local store changed: schedule a debounced publish.
    pub async fn on_local_change(&self, now: u64) {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        if inner.enabled {
            inner.publish_due_at = Some(now + self.config.publish_debounce_millis);
        }
    }

    /// The shared state changed: advance every request we take part in.
    pub async fn on_state_changed(&self, now: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        if !inner.enabled || !self.caps.state.is_ready() {
            return Ok(());
        }

        self.flush_queue(&mut inner, now)?;
        self.serve(&mut inner, now).await?;
        self.download(&mut inner, now).await?;
        self.settle_provider_failures(&mut inner, now)?;
        self.acknowledge_successes(&mut inner, now)?;
        Ok(())
    }

    /// Publish fingerprints immediately. Returns the number published.
    pub async fn publish_now(&self, now: u64) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        inner.observe_clock(now);
        Ok(self.publish_local(&mut inner).await?.len())
    }

    /// Manually re-enable a peer the circuit breaker disabled.
    pub async fn reenable_peer(&self, peer: PeerId) -> bool {
        let mut inner = self.inner.lock().await;
        let was_disabled = inner.failures.reset(peer);
        if was_disabled {
            info!("Re-enabled sync with {}", peer);
            let timestamp = inner.last_now;
            self.notify(SyncNotification::PeerReenabled {
                peer_id: peer,
                timestamp,
            });
        }
        was_disabled
    }

    pub async fn disabled_peers(&self) -> Vec<PeerId> {
        self.inner.lock().await.failures.disabled_peers()
    }

    pub async fn status(&self) -> SyncStatus {
        let inner = self.inner.lock().await;
        SyncStatus {
            peer: self.identity.id,
            enabled: inner.enabled,
            last_sync_timestamp: inner.last_sync,
            disabled_peers: inner.failures.disabled_peers(),
            held_targets: inner.holds.held_targets(inner.last_now),
            queued_requests: inner.negotiator.queued_len(),
            published_files: inner.published_files,
        }
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    async fn run_cycle(&self, inner: &mut Inner, now: u64) -> Result<CycleOutcome> {
        let state = self.caps.state.as_ref();
        if !state.is_ready() {
            debug!("Shared state not ready, skipping cycle");
            return Ok(CycleOutcome::Skipped(SkipReason::NotReady));
        }
        inner.next_cycle_at = Some(now + self.config.auto_sync_interval_ms());
        let self_id = self.identity.id;
        let mut report = CycleReport::default();

        // Departed peers
        if let Some(live) = self.caps.presence.live_peer_ids() {
            report.pruned_peers = prune_departed(state, self_id, &live)?;
            if !report.pruned_peers.is_empty() {
                let peer_ids: Vec<PeerId> = report
                    .pruned_peers
                    .iter()
                    .filter_map(|key| key.parse().ok())
                    .collect();
                inner
                    .reported_conflicts
                    .retain(|(peer, _, _)| !peer_ids.contains(peer));
                self.notify(SyncNotification::PeersPruned {
                    peer_ids,
                    timestamp: now,
                });
            }
        }

        // Stale protocol state
        inner.holds.reap(state, now)?;
        let timed_out =
            inner
                .negotiator
                .expire_requests(state, self_id, now, self.config.request_timeout_ms())?;
        report.timed_out_requests = timed_out.len();
        for request in &timed_out {
            self.settle_failure(inner, request, "Request timed out".to_string(), now)?;
        }
        report.sweep = gc::sweep(state, now, self.config.retention_ms())?;
        inner.negotiator.retain_known(state)?;
        self.retain_acknowledged(inner)?;

        // Our own state
        let local = self.publish_local(inner).await?;
        report.published = local.len();

        // Divergence
        let strategy = self.config.conflict_resolution_strategy;
        let remotes = remote_fingerprints(state, self_id)?;
        if strategy != ConflictStrategy::Notify && !compute_triggers(&local, &remotes, strategy) {
            debug!("Nothing to pull from {} peer(s)", remotes.len());
            return Ok(CycleOutcome::Completed(report));
        }

        for (peer, remote) in &remotes {
            let peer = *peer;
            if inner.failures.is_disabled(peer) {
                debug!("Skipping disabled peer {}", peer);
                continue;
            }
            report.peers_scanned += 1;

            if strategy == ConflictStrategy::Notify {
                for (path, checksum) in compute_conflicts(&local, remote) {
                    if inner.reported_conflicts.insert((peer, path.clone(), checksum)) {
                        report.conflicts += 1;
                        info!("Conflict on {} with {}", path, peer);
                        self.notify(SyncNotification::ConflictDetected {
                            peer_id: peer,
                            path,
                            timestamp: now,
                        });
                    }
                }
            }

            let targets = compute_targets(&local, remote, strategy);
            if targets.is_empty() {
                continue;
            }
            let Some(hold) = inner.holds.try_acquire(
                state,
                &self.identity,
                peer,
                self.config.hold_timeout_ms(),
                now,
            )?
            else {
                continue;
            };

            for target in &targets {
                debug!("Will pull {} from {} ({:?})", target.path, peer, target.reason);
            }
            let provider_name = remote.first().map(|f| f.owner_name.clone());
            let request = build_request(&self.identity, peer, provider_name, &targets, &hold.id, now);
            if self.config.request_delay_millis == 0 {
                negotiator::issue(state, &request)?;
                report.requests_issued += 1;
            } else {
                inner
                    .negotiator
                    .queue(request, now + self.config.request_delay_millis);
                report.requests_queued += 1;
            }
        }

        Ok(CycleOutcome::Completed(report))
    }

    async fn publish_local(&self, inner: &mut Inner) -> Result<Vec<FileFingerprint>> {
        let local = fingerprint::publish(
            self.caps.state.as_ref(),
            self.caps.store.as_ref(),
            &self.identity,
            &self.config.ignored_path_prefixes,
        )
        .await?;
        inner.publish_due_at = None;
        inner.published_files = local.len();
        Ok(local)
    }

    fn flush_queue(&self, inner: &mut Inner, now: u64) -> Result<()> {
        inner
            .negotiator
            .flush_due(self.caps.state.as_ref(), now)?;
        Ok(())
    }

    // ========================================================================
    // Protocol transitions
    // ========================================================================

    async fn serve(&self, inner: &mut Inner, now: u64) -> Result<()> {
        let served = inner
            .negotiator
            .serve_pending(
                self.caps.state.as_ref(),
                self.caps.store.as_ref(),
                self.caps.transfer.as_ref(),
                self.identity.id,
            )
            .await?;

        for outcome in served {
            match outcome {
                Served::Staged { request, .. } => {
                    info!(
                        "Staged {} file(s) for {} (request {})",
                        request.len(),
                        request.requester_name,
                        request.id
                    );
                    self.notify(SyncNotification::RequestServed {
                        requester_id: request.requester_id,
                        request_id: request.id.clone(),
                        file_count: request.len(),
                        timestamp: now,
                    });
                }
                Served::Failed { request, message } => {
                    self.notify(SyncNotification::SyncFailed {
                        peer_id: request.requester_id,
                        request_id: request.id,
                        message,
                        timestamp: now,
                    });
                }
            }
        }
        Ok(())
    }

    async fn download(&self, inner: &mut Inner, now: u64) -> Result<()> {
        let state = self.caps.state.as_ref();
        let downloaded = inner
            .negotiator
            .download_ready(
                state,
                self.caps.store.as_ref(),
                self.caps.transfer.as_ref(),
                self.identity.id,
            )
            .await?;

        for outcome in downloaded {
            match outcome {
                Downloaded::Completed { request, paths } => {
                    record_verification(state, &self.identity, &request.id, request.provider_id, Ok(()), now)?;
                    inner
                        .holds
                        .release(state, self.identity.id, &request.hold_signal_id)?;
                    if inner.failures.record_success(request.provider_id) {
                        self.notify(SyncNotification::PeerReenabled {
                            peer_id: request.provider_id,
                            timestamp: now,
                        });
                    }
                    self.publish_local(inner).await?;
                    inner.last_sync = Some(now);
                    self.notify(SyncNotification::FilesReceived {
                        provider_id: request.provider_id,
                        paths,
                        timestamp: now,
                    });
                }
                Downloaded::Failed { request, message } => {
                    record_verification(
                        state,
                        &self.identity,
                        &request.id,
                        request.provider_id,
                        Err(message.clone()),
                        now,
                    )?;
                    self.settle_failure(inner, &request, message, now)?;
                }
            }
        }
        Ok(())
    }

    fn settle_provider_failures(&self, inner: &mut Inner, now: u64) -> Result<()> {
        let failed = inner
            .negotiator
            .take_provider_failures(self.caps.state.as_ref(), self.identity.id)?;
        for request in &failed {
            self.settle_failure(
                inner,
                request,
                "Provider could not stage the requested files".to_string(),
                now,
            )?;
        }
        Ok(())
    }

    /// Release the hold of a failed request of ours and count the failure.
    fn settle_failure(
        &self,
        inner: &mut Inner,
        request: &SyncRequest,
        message: String,
        now: u64,
    ) -> Result<()> {
        let provider = request.provider_id;
        inner
            .holds
            .release(self.caps.state.as_ref(), self.identity.id, &request.hold_signal_id)?;
        self.notify(SyncNotification::SyncFailed {
            peer_id: provider,
            request_id: request.id.clone(),
            message,
            timestamp: now,
        });
        if inner.failures.record_failure(provider) {
            self.notify(SyncNotification::PeerDisabled {
                peer_id: provider,
                failures: inner.failures.failures(provider),
                timestamp: now,
            });
        }
        Ok(())
    }

    /// A requester verified a transfer we served: its failure count is cleared.
    fn acknowledge_successes(&self, inner: &mut Inner, now: u64) -> Result<()> {
        let successes = take_new_successes(
            self.caps.state.as_ref(),
            self.identity.id,
            &mut inner.acknowledged,
        )?;
        for verification in successes {
            debug!(
                "{} verified request {}",
                verification.verifier_name, verification.request_id
            );
            if inner.failures.record_success(verification.verifier_id) {
                self.notify(SyncNotification::PeerReenabled {
                    peer_id: verification.verifier_id,
                    timestamp: now,
                });
            }
        }
        Ok(())
    }

    fn retain_acknowledged(&self, inner: &mut Inner) -> Result<()> {
        let known: HashSet<String> =
            SharedLog::<VerificationRecord>::new(self.caps.state.as_ref(), VERIFICATIONS)
                .records()?
                .into_iter()
                .map(|v| v.id)
                .collect();
        inner.acknowledged.retain(|id| known.contains(id));
        Ok(())
    }

    fn notify(&self, notification: SyncNotification) {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
        self.bus.emit(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PeerRegistry;
    use crate::shared::LoroState;
    use crate::store::InMemoryStore;
    use crate::transfer::MemoryTransfer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(config: SyncConfig) -> (SyncCoordinator, Arc<InMemoryStore>) {
        let identity = PeerIdentity::new(PeerId::from(1), "alice");
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(PeerRegistry::new());
        registry.peer_connected(identity.id, "alice", 0);
        let caps = Capabilities {
            state: LoroState::new(identity.id).unwrap(),
            store: store.clone(),
            transfer: Arc::new(MemoryTransfer::new()),
            presence: registry,
        };
        (SyncCoordinator::new(identity, config, caps).unwrap(), store)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let identity = PeerIdentity::new(PeerId::from(1), "alice");
        let caps = Capabilities {
            state: LoroState::new(identity.id).unwrap(),
            store: Arc::new(InMemoryStore::new()),
            transfer: Arc::new(MemoryTransfer::new()),
            presence: Arc::new(PeerRegistry::new()),
        };
        let config = SyncConfig {
            hold_timeout_seconds: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncCoordinator::new(identity, config, caps),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_coordinator_skips_cycles() {
        let (coordinator, _) = coordinator(SyncConfig::default());
        assert_eq!(
            coordinator.request_sync_now(0).await.unwrap(),
            CycleOutcome::Skipped(SkipReason::Disabled)
        );
        assert_eq!(coordinator.tick(100_000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tick_runs_first_cycle_after_enable() {
        let (coordinator, store) = coordinator(SyncConfig::default());
        store.insert("a.png", b"A", 1, None);
        coordinator.enable(1000).await;

        assert_eq!(coordinator.tick(1100).await.unwrap(), None);
        let outcome = coordinator.tick(1500).await.unwrap();
        match outcome {
            Some(CycleOutcome::Completed(report)) => assert_eq!(report.published, 1),
            other => panic!("unexpected {other:?}"),
        }

        // Next cycle waits for the interval
        assert_eq!(coordinator.tick(2000).await.unwrap(), None);
        assert!(coordinator.tick(11_500).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_change_publish_is_debounced() {
        let (coordinator, store) = coordinator(SyncConfig::default());
        coordinator.enable(0).await;
        coordinator.request_sync_now(0).await.unwrap();
        assert_eq!(coordinator.status().await.published_files, 0);

        store.insert("a.png", b"A", 1, None);
        coordinator.on_local_change(100).await;
        store.insert("b.png", b"B", 1, None);
        coordinator.on_local_change(600).await;

        coordinator.tick(1500).await.unwrap();
        assert_eq!(coordinator.status().await.published_files, 0);
        coordinator.tick(1600).await.unwrap();
        assert_eq!(coordinator.status().await.published_files, 2);
    }

    #[tokio::test]
    async fn test_not_ready_state_skips_cycle() {
        let identity = PeerIdentity::new(PeerId::from(1), "alice");
        let state = LoroState::new(identity.id).unwrap();
        state.set_ready(false);
        let caps = Capabilities {
            state: state.clone(),
            store: Arc::new(InMemoryStore::new()),
            transfer: Arc::new(MemoryTransfer::new()),
            presence: Arc::new(PeerRegistry::new()),
        };
        let coordinator = SyncCoordinator::new(identity, SyncConfig::default(), caps).unwrap();
        coordinator.enable(0).await;
        assert_eq!(
            coordinator.request_sync_now(0).await.unwrap(),
            CycleOutcome::Skipped(SkipReason::NotReady)
        );
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_subscribers_notified() {
        let (coordinator, _) = coordinator(SyncConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _sub = coordinator.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..(HISTORY_LIMIT as u64 + 5) {
            coordinator.notify(SyncNotification::PeerReenabled {
                peer_id: PeerId::from(2),
                timestamp: i,
            });
        }

        let history = coordinator.notifications();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(
            history[0],
            SyncNotification::PeerReenabled {
                peer_id: PeerId::from(2),
                timestamp: 5
            }
        );
        assert_eq!(seen.load(Ordering::SeqCst), HISTORY_LIMIT + 5);
    }

    #[tokio::test]
    async fn test_reenable_unknown_peer_is_noop() {
        let (coordinator, _) = coordinator(SyncConfig::default());
        assert!(!coordinator.reenable_peer(PeerId::from(7)).await);
        assert!(coordinator.notifications().is_empty());
        assert!(coordinator.disabled_peers().await.is_empty());
    }
}
