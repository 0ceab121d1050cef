//! Request/response state machine for pulling files from one provider.
//!
//! ```text
//! requester                  shared request log                 provider
//!   issue ------------------> pending
//!                             pending  <------------------------ stage files
//!                             ready(handle) <-------------------
//!   fetch + apply batch <---- ready
//!   completed | failed -----> completed | failed
//! ```
//!
//! Every transition is a whole-record replace located by request id at write
//! time. Both sides keep local idempotency sets because the same request can
//! be observed any number of times.

use crate::records::{RequestStatus, SyncRequest, new_record_id};
use crate::scanner::PullTarget;
use crate::shared::{REQUESTS, SharedLog, SharedState, SharedStateError};
use crate::store::{FileStore, StoreError, StoreOp, WriteOptions};
use crate::transfer::{BulkTransfer, TransferError, TransferItem, TransferMetadata};
use crate::{PeerId, PeerIdentity};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a payload couldn't be staged or applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Payload has no item for {0}")]
    MissingItem(String),

    #[error("Request {0} has no transfer handle")]
    MissingHandle(String),
}

type Result<T> = std::result::Result<T, SharedStateError>;

/// Build a pending request for `targets`, all pulled from `provider`.
pub fn build_request(
    requester: &PeerIdentity,
    provider: PeerId,
    provider_name: Option<String>,
    targets: &[PullTarget],
    hold_signal_id: &str,
    now: u64,
) -> SyncRequest {
    SyncRequest {
        id: new_record_id(),
        requester_id: requester.id,
        requester_name: requester.name.clone(),
        provider_id: provider,
        provider_name,
        files: targets.iter().map(|t| t.file_id.clone()).collect(),
        file_paths: targets.iter().map(|t| t.path.clone()).collect(),
        remote_timestamps: targets.iter().map(|t| t.remote_modified).collect(),
        document_ids: targets.iter().map(|t| t.linked_document_id.clone()).collect(),
        deletion_states: targets.iter().map(|t| t.deleted).collect(),
        created_at: now,
        status: RequestStatus::Pending,
        transfer_handle: None,
        hold_signal_id: hold_signal_id.to_string(),
    }
}

/// Result of serving one pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Staged {
        request: SyncRequest,
        handle: String,
    },
    Failed {
        request: SyncRequest,
        message: String,
    },
}

/// Result of downloading one ready request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downloaded {
    Completed {
        request: SyncRequest,
        paths: Vec<String>,
    },
    Failed {
        request: SyncRequest,
        message: String,
    },
}

#[derive(Debug, Clone)]
struct QueuedRequest {
    request: SyncRequest,
    due_at: u64,
}

fn download_marker(request_id: &str) -> String {
    format!("download_{request_id}")
}

/// Both halves of the negotiation for one peer.
#[derive(Debug, Default)]
pub struct Negotiator {
    /// Provider: request ids already staged (or being staged)
    staged: HashSet<String>,
    /// Requester: `download_<id>` markers
    downloads: HashSet<String>,
    /// Requester: own failed requests already accounted for
    settled_failures: HashSet<String>,
    /// Requester: built but not yet appended
    queued: Vec<QueuedRequest>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a request back until `due_at`.
    pub fn queue(&mut self, request: SyncRequest, due_at: u64) {
        debug!(
            "Queued request {} to {} ({} file(s)) until {}",
            request.id,
            request.provider_id,
            request.len(),
            due_at
        );
        self.queued.push(QueuedRequest { request, due_at });
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Drop every queued request, returning them so their holds can be released.
    pub fn drain_queue(&mut self) -> Vec<SyncRequest> {
        self.queued.drain(..).map(|q| q.request).collect()
    }

    /// Append every queued request whose delay has elapsed.
    pub fn flush_due(&mut self, state: &dyn SharedState, now: u64) -> Result<Vec<SyncRequest>> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.queued.drain(..).partition(|q| q.due_at <= now);
        self.queued = waiting;

        let mut issued = Vec::with_capacity(due.len());
        for queued in due {
            issue(state, &queued.request)?;
            issued.push(queued.request);
        }
        Ok(issued)
    }

    // ------------------------------------------------------------------------
    // Provider side
    // ------------------------------------------------------------------------

    /// Stage every pending request addressed to `self_id` that we haven't
    /// seen yet, and move it to ready (or failed).
    pub async fn serve_pending(
        &mut self,
        state: &dyn SharedState,
        store: &dyn FileStore,
        transfer: &dyn BulkTransfer,
        self_id: PeerId,
    ) -> Result<Vec<Served>> {
        let log = SharedLog::<SyncRequest>::new(state, REQUESTS);
        let pending: Vec<SyncRequest> = log
            .records()?
            .into_iter()
            .filter(|r| r.provider_id == self_id && r.status == RequestStatus::Pending)
            .filter(|r| !self.staged.contains(&r.id))
            .collect();

        let mut served = Vec::with_capacity(pending.len());
        for request in pending {
            self.staged.insert(request.id.clone());

            match stage(store, transfer, &request).await {
                Ok(handle) => {
                    let updated = log.update_where(
                        |r| r.id == request.id && r.status == RequestStatus::Pending,
                        |mut r| {
                            r.status = RequestStatus::Ready;
                            r.transfer_handle = Some(handle.clone());
                            r
                        },
                    )?;
                    match updated {
                        Some(request) => {
                            debug!("Request {} ready with handle {}", request.id, handle);
                            served.push(Served::Staged { request, handle });
                        }
                        None => debug!("Request {} left pending before staging finished", request.id),
                    }
                }
                Err(e) => {
                    warn!("Failed to stage request {}: {}", request.id, e);
                    self.staged.remove(&request.id);
                    let updated = log.update_where(
                        |r| r.id == request.id && r.status == RequestStatus::Pending,
                        |mut r| {
                            r.status = RequestStatus::Failed;
                            r
                        },
                    )?;
                    if let Some(request) = updated {
                        served.push(Served::Failed {
                            request,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(served)
    }

    // ------------------------------------------------------------------------
    // Requester side
    // ------------------------------------------------------------------------

    /// Fetch and apply every ready request of ours that we haven't started.
    pub async fn download_ready(
        &mut self,
        state: &dyn SharedState,
        store: &dyn FileStore,
        transfer: &dyn BulkTransfer,
        self_id: PeerId,
    ) -> Result<Vec<Downloaded>> {
        let log = SharedLog::<SyncRequest>::new(state, REQUESTS);
        let ready: Vec<SyncRequest> = log
            .records()?
            .into_iter()
            .filter(|r| r.requester_id == self_id && r.status == RequestStatus::Ready)
            .filter(|r| !self.downloads.contains(&download_marker(&r.id)))
            .collect();

        let mut downloaded = Vec::with_capacity(ready.len());
        for request in ready {
            let marker = download_marker(&request.id);
            self.downloads.insert(marker.clone());

            let outcome = apply(store, transfer, &request).await;
            let status = match outcome {
                Ok(_) => RequestStatus::Completed,
                Err(_) => RequestStatus::Failed,
            };
            let updated = log
                .update_where(
                    |r| r.id == request.id && r.status == RequestStatus::Ready,
                    |mut r| {
                        r.status = status;
                        r
                    },
                )?
                .unwrap_or_else(|| SyncRequest {
                    status,
                    ..request.clone()
                });

            match outcome {
                Ok(paths) => {
                    info!(
                        "Pulled {} file(s) from {} (request {})",
                        paths.len(),
                        request.provider_id,
                        request.id
                    );
                    downloaded.push(Downloaded::Completed {
                        request: updated,
                        paths,
                    });
                }
                Err(e) => {
                    warn!("Download of request {} failed: {}", request.id, e);
                    self.downloads.remove(&marker);
                    self.settled_failures.insert(request.id.clone());
                    downloaded.push(Downloaded::Failed {
                        request: updated,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(downloaded)
    }

    /// Our requests that the provider marked failed without ever making them
    /// ready. Each is returned once.
    pub fn take_provider_failures(
        &mut self,
        state: &dyn SharedState,
        self_id: PeerId,
    ) -> Result<Vec<SyncRequest>> {
        let requests = SharedLog::<SyncRequest>::new(state, REQUESTS).records()?;
        Ok(requests
            .into_iter()
            .filter(|r| r.requester_id == self_id && r.status == RequestStatus::Failed)
            .filter(|r| !self.downloads.contains(&download_marker(&r.id)))
            .filter(|r| self.settled_failures.insert(r.id.clone()))
            .collect())
    }

    /// Mark our own in-flight requests older than `timeout_ms` as failed.
    pub fn expire_requests(
        &mut self,
        state: &dyn SharedState,
        self_id: PeerId,
        now: u64,
        timeout_ms: u64,
    ) -> Result<Vec<SyncRequest>> {
        let log = SharedLog::<SyncRequest>::new(state, REQUESTS);
        let stale: Vec<String> = log
            .records()?
            .into_iter()
            .filter(|r| r.requester_id == self_id && !r.status.is_terminal())
            .filter(|r| now.saturating_sub(r.created_at) >= timeout_ms)
            .map(|r| r.id)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            let updated = log.update_where(
                |r| r.id == id && !r.status.is_terminal(),
                |mut r| {
                    r.status = RequestStatus::Failed;
                    r
                },
            )?;
            if let Some(request) = updated {
                warn!("Request {} to {} timed out", request.id, request.provider_id);
                self.settled_failures.insert(request.id.clone());
                expired.push(request);
            }
        }
        Ok(expired)
    }

    /// Forget ids of requests that are no longer in the log.
    pub fn retain_known(&mut self, state: &dyn SharedState) -> Result<()> {
        let known: HashSet<String> = SharedLog::<SyncRequest>::new(state, REQUESTS)
            .records()?
            .into_iter()
            .map(|r| r.id)
            .collect();
        self.staged.retain(|id| known.contains(id));
        self.settled_failures.retain(|id| known.contains(id));
        self.downloads
            .retain(|marker| known.contains(marker.trim_start_matches("download_")));
        Ok(())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.staged.len() + self.downloads.len() + self.settled_failures.len()
    }
}

/// Append a pending request to the shared log.
pub fn issue(state: &dyn SharedState, request: &SyncRequest) -> Result<()> {
    SharedLog::<SyncRequest>::new(state, REQUESTS).append(request)?;
    debug!(
        "Issued request {} to {} for {:?}",
        request.id, request.provider_id, request.file_paths
    );
    Ok(())
}

/// Stage the requested files. Tombstones travel as empty deleted items.
async fn stage(
    store: &dyn FileStore,
    transfer: &dyn BulkTransfer,
    request: &SyncRequest,
) -> std::result::Result<String, ApplyError> {
    let mut items = Vec::with_capacity(request.len());
    for entry in request.entries() {
        let content = if entry.deleted {
            Vec::new()
        } else {
            store.read_path(entry.path).await?
        };
        items.push(TransferItem {
            path: entry.path.to_string(),
            content,
            metadata: TransferMetadata {
                file_id: entry.file_id.to_string(),
                modified_at: entry.remote_timestamp,
                linked_document_id: entry.document_id.map(str::to_string),
                deleted: entry.deleted,
            },
        });
    }
    Ok(transfer.stage(items).await?)
}

/// Fetch a ready payload and apply it as one batch. Returns the touched paths.
async fn apply(
    store: &dyn FileStore,
    transfer: &dyn BulkTransfer,
    request: &SyncRequest,
) -> std::result::Result<Vec<String>, ApplyError> {
    let handle = request
        .transfer_handle
        .as_deref()
        .ok_or_else(|| ApplyError::MissingHandle(request.id.clone()))?;

    let mut stream = transfer.fetch(handle).await?;
    let mut items: HashMap<String, TransferItem> = HashMap::new();
    while let Some(item) = stream.next().await {
        let item = item?;
        items.insert(item.path.clone(), item);
    }

    let mut ops = Vec::with_capacity(request.len());
    for entry in request.entries() {
        if entry.deleted {
            ops.push(StoreOp::Delete {
                path: entry.path.to_string(),
                deleted_at: entry.remote_timestamp,
            });
            continue;
        }
        let item = items
            .remove(entry.path)
            .ok_or_else(|| ApplyError::MissingItem(entry.path.to_string()))?;
        ops.push(StoreOp::Write {
            path: entry.path.to_string(),
            content: item.content,
            options: WriteOptions {
                modified_at: Some(entry.remote_timestamp),
                linked_document_id: entry.document_id.map(str::to_string),
            },
        });
    }

    let paths = ops.iter().map(|op| op.path().to_string()).collect();
    store.apply_batch(ops).await?;
    Ok(paths)
}
