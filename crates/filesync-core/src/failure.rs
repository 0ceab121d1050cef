//! Verification records and the per-peer circuit breaker.
//!
//! The failure tracker is local to one peer and never replicated: each peer
//! decides for itself which providers it has given up on.

use crate::records::{VerificationRecord, VerificationStatus, new_record_id};
use crate::shared::{Result, SharedLog, SharedState, VERIFICATIONS};
use crate::{PeerId, PeerIdentity};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Consecutive-failure counters with a disable threshold.
#[derive(Debug)]
pub struct FailureTracker {
    threshold: u32,
    failures: HashMap<PeerId, u32>,
    disabled: HashSet<PeerId>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    /// Count one failure against `peer`.
    ///
    /// Returns `true` when this failure crossed the threshold and disabled the peer.
    pub fn record_failure(&mut self, peer: PeerId) -> bool {
        let count = self.failures.entry(peer).or_insert(0);
        *count += 1;
        debug!("Failure {} of {} with {}", count, self.threshold, peer);
        if *count >= self.threshold && self.disabled.insert(peer) {
            info!("Disabling sync with {} after {} consecutive failures", peer, count);
            return true;
        }
        false
    }

    /// Reset the counter after a successful transfer. Returns `true` if the
    /// peer was disabled.
    pub fn record_success(&mut self, peer: PeerId) -> bool {
        self.failures.remove(&peer);
        self.disabled.remove(&peer)
    }

    /// Manual re-enable.
    pub fn reset(&mut self, peer: PeerId) -> bool {
        self.record_success(peer)
    }

    pub fn is_disabled(&self, peer: PeerId) -> bool {
        self.disabled.contains(&peer)
    }

    pub fn failures(&self, peer: PeerId) -> u32 {
        self.failures.get(&peer).copied().unwrap_or(0)
    }

    /// Disabled peers, sorted.
    pub fn disabled_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.disabled.iter().copied().collect();
        peers.sort();
        peers
    }
}

/// Append a verification record for a finished request.
pub fn record_verification(
    state: &dyn SharedState,
    verifier: &PeerIdentity,
    request_id: &str,
    provider_id: PeerId,
    outcome: std::result::Result<(), String>,
    now: u64,
) -> Result<VerificationRecord> {
    let (status, message) = match outcome {
        Ok(()) => (VerificationStatus::Success, None),
        Err(message) => (VerificationStatus::Failure, Some(message)),
    };
    let record = VerificationRecord {
        id: new_record_id(),
        request_id: request_id.to_string(),
        verifier_id: verifier.id,
        verifier_name: verifier.name.clone(),
        provider_id,
        timestamp: now,
        status,
        message,
    };
    SharedLog::<VerificationRecord>::new(state, VERIFICATIONS).append(&record)?;
    Ok(record)
}

/// Success verifications of requests we served that haven't been seen yet.
/// Their ids are added to `acknowledged`.
pub fn take_new_successes(
    state: &dyn SharedState,
    self_id: PeerId,
    acknowledged: &mut HashSet<String>,
) -> Result<Vec<VerificationRecord>> {
    let records = SharedLog::<VerificationRecord>::new(state, VERIFICATIONS).records()?;
    Ok(records
        .into_iter()
        .filter(|v| v.provider_id == self_id && v.status == VerificationStatus::Success)
        .filter(|v| acknowledged.insert(v.id.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::LoroState;

    #[test]
    fn test_disables_at_threshold_once() {
        let mut tracker = FailureTracker::new(3);
        let c = PeerId::from(0xc);

        assert!(!tracker.record_failure(c));
        assert!(!tracker.record_failure(c));
        assert!(tracker.record_failure(c));
        assert!(tracker.is_disabled(c));
        assert!(!tracker.record_failure(c));
        assert_eq!(tracker.failures(c), 4);
        assert_eq!(tracker.disabled_peers(), vec![c]);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut tracker = FailureTracker::new(3);
        let c = PeerId::from(0xc);
        tracker.record_failure(c);
        tracker.record_failure(c);
        assert!(!tracker.record_success(c));
        assert_eq!(tracker.failures(c), 0);

        tracker.record_failure(c);
        tracker.record_failure(c);
        assert!(tracker.record_failure(c));
        assert!(tracker.reset(c));
        assert!(!tracker.is_disabled(c));
    }

    #[test]
    fn test_new_successes_are_taken_once() {
        let provider = PeerIdentity::new(PeerId::from(2), "bob");
        let requester = PeerIdentity::new(PeerId::from(1), "alice");
        let state = LoroState::new(provider.id).unwrap();

        record_verification(state.as_ref(), &requester, "r1", provider.id, Ok(()), 10).unwrap();
        record_verification(state.as_ref(), &requester, "r2", provider.id, Err("boom".into()), 11)
            .unwrap();
        record_verification(state.as_ref(), &requester, "r3", PeerId::from(7), Ok(()), 12).unwrap();

        let mut seen = HashSet::new();
        let first = take_new_successes(state.as_ref(), provider.id, &mut seen).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].request_id, "r1");
        assert_eq!(first[0].verifier_id, requester.id);
        assert!(take_new_successes(state.as_ref(), provider.id, &mut seen).unwrap().is_empty());
    }
}
