//! Bulk transfer capability for moving file payloads between peers.
//!
//! The coordination protocol only negotiates *which* files move; the bytes
//! travel through a `BulkTransfer` implementation. The provider stages a
//! payload and gets back an opaque handle, the requester fetches the payload
//! as a stream of items using that handle.
//!
//! `MemoryTransfer` is an in-process implementation shared by every peer of a
//! local session (and by tests).

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Staging failed: {0}")]
    StageFailed(String),

    #[error("Unknown transfer handle: {0}")]
    UnknownHandle(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;

/// Metadata travelling with each payload item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub file_id: String,
    pub modified_at: u64,
    pub linked_document_id: Option<String>,
    pub deleted: bool,
}

/// One file of a staged payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub path: String,
    pub content: Vec<u8>,
    pub metadata: TransferMetadata,
}

/// Point-to-point bulk byte transfer.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Make a payload available and return the handle that retrieves it.
    async fn stage(&self, items: Vec<TransferItem>) -> Result<String>;

    /// Retrieve a staged payload.
    async fn fetch(&self, handle: &str) -> Result<BoxStream<'static, Result<TransferItem>>>;
}

/// In-process bulk transfer with failure injection.
#[derive(Default)]
pub struct MemoryTransfer {
    payloads: RwLock<HashMap<String, Vec<TransferItem>>>,
    failing_stages: AtomicUsize,
    failing_fetches: AtomicUsize,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `stage` fail.
    pub fn fail_next_stages(&self, count: usize) {
        self.failing_stages.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `fetch` fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Number of payloads currently staged.
    pub fn staged_count(&self) -> usize {
        self.payloads.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop a staged payload.
    pub fn discard(&self, handle: &str) -> bool {
        self.payloads
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle)
            .is_some()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BulkTransfer for MemoryTransfer {
    async fn stage(&self, items: Vec<TransferItem>) -> Result<String> {
        if Self::take_failure(&self.failing_stages) {
            return Err(TransferError::StageFailed("injected failure".into()));
        }
        let handle = uuid::Uuid::new_v4().to_string();
        self.payloads
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.clone(), items);
        Ok(handle)
    }

    async fn fetch(&self, handle: &str) -> Result<BoxStream<'static, Result<TransferItem>>> {
        if Self::take_failure(&self.failing_fetches) {
            return Err(TransferError::FetchFailed("injected failure".into()));
        }
        let items = self
            .payloads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .cloned()
            .ok_or_else(|| TransferError::UnknownHandle(handle.to_string()))?;
        Ok(stream::iter(items.into_iter().map(Ok)).boxed())
    }
}
