//! filesync-core: peer-to-peer file synchronization coordination.
//!
//! Participants of a collaborative session keep their non-collaboratively
//! edited files (binary assets, linked sources) in sync without a central
//! file server. This crate provides:
//! - Fingerprint publication and divergence detection between peers
//! - An advisory hold mechanism and a request/response transfer state machine
//! - Verification, circuit breaking and garbage collection of protocol state
//! - `SharedState`, `FileStore`, `BulkTransfer` and `Presence` capability traits,
//!   with loro-backed and in-memory implementations

pub mod config;
pub mod coordinator;
pub mod events;
pub mod failure;
pub mod fingerprint;
pub mod gc;
pub mod hold;
pub mod negotiator;
pub mod peer_id;
pub mod presence;
pub mod records;
pub mod scanner;
pub mod shared;
pub mod store;
pub mod transfer;

pub use config::{ConfigError, ConflictStrategy, SyncConfig};
pub use coordinator::{
    Capabilities, CoordinatorError, CycleOutcome, CycleReport, SkipReason, SyncCoordinator,
    SyncStatus,
};
pub use events::{EventBus, Subscription, SyncNotification};
pub use peer_id::{PeerId, PeerIdError, PeerIdentity};
pub use presence::{PeerRegistry, Presence};
pub use records::{
    FileFingerprint, HoldSignal, HoldStatus, RequestStatus, SyncRequest, VerificationRecord,
    VerificationStatus,
};
pub use shared::{ChangeOrigin, LoroRelay, LoroState, SharedState, SharedStateError, StateChange};
pub use store::{FileRecord, FileStore, InMemoryStore, StoreChange, StoreError, StoreOp, WriteOptions};
pub use transfer::{BulkTransfer, MemoryTransfer, TransferError, TransferItem, TransferMetadata};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    use web_time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
