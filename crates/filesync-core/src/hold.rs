//! Advisory holds that keep a peer from issuing overlapping requests to the
//! same provider.
//!
//! A hold is a `HoldSignal` record in the shared hold log plus a local marker
//! on the holder. Exclusivity is only checked against the local markers, so
//! two different requesters can still target the same provider at once.

use crate::records::{HoldSignal, HoldStatus, new_record_id};
use crate::shared::{HOLDS, Result, SharedLog, SharedState};
use crate::{PeerId, PeerIdentity};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct HoldMarker {
    hold_id: String,
    expires_at: u64,
}

/// Local side of the hold protocol for one peer.
#[derive(Debug, Default)]
pub struct HoldCoordinator {
    markers: HashMap<PeerId, HoldMarker>,
}

impl HoldCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether we hold an unexpired hold against `target`.
    pub fn is_held(&self, target: PeerId, now: u64) -> bool {
        self.markers
            .get(&target)
            .is_some_and(|marker| now < marker.expires_at)
    }

    /// Targets we currently hold, sorted.
    pub fn held_targets(&self, now: u64) -> Vec<PeerId> {
        let mut targets: Vec<_> = self
            .markers
            .iter()
            .filter(|(_, marker)| now < marker.expires_at)
            .map(|(target, _)| *target)
            .collect();
        targets.sort();
        targets
    }

    /// Append an active hold against `target`, unless we already hold one.
    pub fn try_acquire(
        &mut self,
        state: &dyn SharedState,
        holder: &PeerIdentity,
        target: PeerId,
        ttl_ms: u64,
        now: u64,
    ) -> Result<Option<HoldSignal>> {
        if self.is_held(target, now) {
            debug!("Hold against {} already in place", target);
            return Ok(None);
        }

        let hold = HoldSignal {
            id: new_record_id(),
            holder_id: holder.id,
            holder_name: holder.name.clone(),
            target_peer_id: target,
            issued_at: now,
            expires_at: now + ttl_ms,
            status: HoldStatus::Active,
        };
        SharedLog::<HoldSignal>::new(state, HOLDS).append(&hold)?;
        self.markers.insert(
            target,
            HoldMarker {
                hold_id: hold.id.clone(),
                expires_at: hold.expires_at,
            },
        );
        debug!("Acquired hold {} against {}", hold.id, target);
        Ok(Some(hold))
    }

    /// Flip one of our active holds to released and clear its marker.
    ///
    /// Returns `false` if no active hold of ours has that id (already
    /// released, expired or collected).
    pub fn release(&mut self, state: &dyn SharedState, self_id: PeerId, hold_id: &str) -> Result<bool> {
        self.markers.retain(|_, marker| marker.hold_id != hold_id);

        let released = SharedLog::<HoldSignal>::new(state, HOLDS).update_where(
            |h| h.id == hold_id && h.holder_id == self_id && h.is_active(),
            |mut h| {
                h.status = HoldStatus::Released;
                h
            },
        )?;
        if released.is_some() {
            debug!("Released hold {}", hold_id);
        }
        Ok(released.is_some())
    }

    /// Expire every lapsed active hold and drop our lapsed markers.
    pub fn reap(&mut self, state: &dyn SharedState, now: u64) -> Result<Vec<HoldSignal>> {
        let expired = expire_stale(state, now)?;
        self.markers.retain(|_, marker| {
            now < marker.expires_at && !expired.iter().any(|h| h.id == marker.hold_id)
        });
        Ok(expired)
    }

    /// Forget every marker without touching the shared log.
    pub fn clear(&mut self) {
        self.markers.clear();
    }
}

/// Flip every active hold whose `expires_at` has passed to expired.
///
/// Any peer may do this: the write is the same on every peer.
pub fn expire_stale(state: &dyn SharedState, now: u64) -> Result<Vec<HoldSignal>> {
    let log = SharedLog::<HoldSignal>::new(state, HOLDS);
    let stale: Vec<String> = log
        .records()?
        .into_iter()
        .filter(|h| h.is_active() && h.is_expired_at(now))
        .map(|h| h.id)
        .collect();

    let mut expired = Vec::with_capacity(stale.len());
    for id in stale {
        let updated = log.update_where(
            |h| h.id == id && h.is_active(),
            |mut h| {
                h.status = HoldStatus::Expired;
                h
            },
        )?;
        if let Some(hold) = updated {
            debug!("Hold {} expired", hold.id);
            expired.push(hold);
        }
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::LoroState;

    fn me() -> PeerIdentity {
        PeerIdentity::new(PeerId::from(1), "alice")
    }

    fn holds(state: &dyn SharedState) -> Vec<HoldSignal> {
        SharedLog::<HoldSignal>::new(state, HOLDS).records().unwrap()
    }

    #[test]
    fn test_hold_is_exclusive_until_released() {
        let state = LoroState::new(me().id).unwrap();
        let mut coordinator = HoldCoordinator::new();
        let target = PeerId::from(2);

        let hold = coordinator
            .try_acquire(state.as_ref(), &me(), target, 30_000, 1000)
            .unwrap()
            .unwrap();
        assert_eq!(hold.expires_at, 31_000);
        assert!(
            coordinator
                .try_acquire(state.as_ref(), &me(), target, 30_000, 2000)
                .unwrap()
                .is_none()
        );

        // A different target is independent
        assert!(
            coordinator
                .try_acquire(state.as_ref(), &me(), PeerId::from(3), 30_000, 2000)
                .unwrap()
                .is_some()
        );

        assert!(coordinator.release(state.as_ref(), me().id, &hold.id).unwrap());
        assert!(!coordinator.release(state.as_ref(), me().id, &hold.id).unwrap());
        assert!(
            coordinator
                .try_acquire(state.as_ref(), &me(), target, 30_000, 3000)
                .unwrap()
                .is_some()
        );

        let statuses: Vec<_> = holds(state.as_ref()).into_iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![HoldStatus::Released, HoldStatus::Active, HoldStatus::Active]
        );
    }

    #[test]
    fn test_marker_lapses_with_clock() {
        let state = LoroState::new(me().id).unwrap();
        let mut coordinator = HoldCoordinator::new();
        let target = PeerId::from(2);

        coordinator
            .try_acquire(state.as_ref(), &me(), target, 100, 0)
            .unwrap();
        assert!(coordinator.is_held(target, 99));
        assert!(!coordinator.is_held(target, 100));
        assert!(
            coordinator
                .try_acquire(state.as_ref(), &me(), target, 100, 100)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_reap_expires_only_lapsed_holds() {
        let state = LoroState::new(me().id).unwrap();
        let mut coordinator = HoldCoordinator::new();
        coordinator
            .try_acquire(state.as_ref(), &me(), PeerId::from(2), 100, 0)
            .unwrap();
        coordinator
            .try_acquire(state.as_ref(), &me(), PeerId::from(3), 1000, 0)
            .unwrap();

        let expired = coordinator.reap(state.as_ref(), 100).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target_peer_id, PeerId::from(2));
        assert_eq!(coordinator.held_targets(100), vec![PeerId::from(3)]);

        let statuses: Vec<_> = holds(state.as_ref()).into_iter().map(|h| h.status).collect();
        assert_eq!(statuses, vec![HoldStatus::Expired, HoldStatus::Active]);
    }

    #[test]
    fn test_cannot_release_someone_elses_hold() {
        let state = LoroState::new(me().id).unwrap();
        let mut theirs = HoldCoordinator::new();
        let other = PeerIdentity::new(PeerId::from(9), "bob");
        let hold = theirs
            .try_acquire(state.as_ref(), &other, PeerId::from(2), 1000, 0)
            .unwrap()
            .unwrap();

        let mut mine = HoldCoordinator::new();
        assert!(!mine.release(state.as_ref(), me().id, &hold.id).unwrap());
        assert!(holds(state.as_ref())[0].is_active());
    }
}
