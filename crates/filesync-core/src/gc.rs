//! Garbage collection of the shared hold, request and verification logs.

use crate::hold::expire_stale;
use crate::records::{HoldSignal, SyncRequest, VerificationRecord};
use crate::shared::{HOLDS, REQUESTS, Result, SharedLog, SharedState, VERIFICATIONS};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_holds: usize,
    pub removed_holds: usize,
    pub removed_requests: usize,
    pub removed_verifications: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.removed_holds + self.removed_requests + self.removed_verifications
    }
}

/// Expire lapsed holds and delete records older than the retention window.
///
/// - holds: non-active, `expires_at` more than `retention_ms` ago
/// - requests: terminal, `created_at` more than `retention_ms` ago
/// - verifications: `timestamp` more than `retention_ms` ago
pub fn sweep(state: &dyn SharedState, now: u64, retention_ms: u64) -> Result<SweepReport> {
    let is_old = |at: u64| now.saturating_sub(at) > retention_ms;

    let expired_holds = expire_stale(state, now)?.len();
    let removed_holds = remove_matching(
        &SharedLog::<HoldSignal>::new(state, HOLDS),
        |h| !h.is_active() && is_old(h.expires_at),
    )?;
    let removed_requests = remove_matching(
        &SharedLog::<SyncRequest>::new(state, REQUESTS),
        |r| r.status.is_terminal() && is_old(r.created_at),
    )?;
    let removed_verifications = remove_matching(
        &SharedLog::<VerificationRecord>::new(state, VERIFICATIONS),
        |v| is_old(v.timestamp),
    )?;

    let report = SweepReport {
        expired_holds,
        removed_holds,
        removed_requests,
        removed_verifications,
    };
    if report.expired_holds > 0 || report.removed() > 0 {
        debug!("GC sweep: {:?}", report);
    }
    Ok(report)
}

/// Remove every record matching `pred`, last index first so the earlier
/// indices stay valid while removing.
fn remove_matching<T: Serialize + DeserializeOwned>(
    log: &SharedLog<'_, T>,
    pred: impl Fn(&T) -> bool,
) -> Result<usize> {
    let doomed: Vec<usize> = log
        .entries()?
        .into_iter()
        .filter(|(_, record)| pred(record))
        .map(|(index, _)| index)
        .collect();

    for index in doomed.iter().rev() {
        log.remove_at(*index)?;
    }
    Ok(doomed.len())
}
