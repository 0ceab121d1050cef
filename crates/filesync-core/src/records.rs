//! Records exchanged through the shared coordination state.
//!
//! Every record is serialized as a camelCase JSON object. Records are owned by
//! the peer named in their "self" field (`ownerId`, `holderId`, `requesterId`
//! or `providerId` depending on the transition, `verifierId`) but readable by
//! every participant.

use crate::PeerId;
use serde::{Deserialize, Serialize};

/// Published description of one locally tracked file (or tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFingerprint {
    pub file_id: String,
    pub file_name: String,
    pub file_path: String,
    /// Modification time in milliseconds since epoch
    pub last_modified: u64,
    /// Size in bytes (0 for tombstones)
    pub size: u64,
    /// Hex SHA-256 of the content (of empty content for tombstones)
    pub checksum: String,
    pub owner_id: PeerId,
    pub owner_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_document_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HoldStatus {
    Active,
    Released,
    Expired,
}

/// Advisory lock a requester takes against a provider before asking it for files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldSignal {
    pub id: String,
    pub holder_id: PeerId,
    pub holder_name: String,
    pub target_peer_id: PeerId,
    pub issued_at: u64,
    pub expires_at: u64,
    pub status: HoldStatus,
}

impl HoldSignal {
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// An active hold stops counting once `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    /// Requester has asked
    Pending,
    /// Provider has staged the files and published a transfer handle
    Ready,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// A pull request from a requester to a provider.
///
/// `files`, `file_paths`, `remote_timestamps`, `document_ids` and
/// `deletion_states` are index-aligned: entry `i` of each describes the same
/// requested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub id: String,
    pub requester_id: PeerId,
    pub requester_name: String,
    pub provider_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    pub files: Vec<String>,
    pub file_paths: Vec<String>,
    pub remote_timestamps: Vec<u64>,
    pub document_ids: Vec<Option<String>>,
    pub deletion_states: Vec<bool>,
    pub created_at: u64,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_handle: Option<String>,
    pub hold_signal_id: String,
}

/// One row of a request's parallel arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedFile<'a> {
    pub file_id: &'a str,
    pub path: &'a str,
    pub remote_timestamp: u64,
    pub document_id: Option<&'a str>,
    pub deleted: bool,
}

impl SyncRequest {
    /// Iterate the requested files. Stops at the shortest array, so a
    /// malformed record never indexes out of bounds.
    pub fn entries(&self) -> impl Iterator<Item = RequestedFile<'_>> {
        self.files
            .iter()
            .zip(&self.file_paths)
            .zip(&self.remote_timestamps)
            .zip(&self.document_ids)
            .zip(&self.deletion_states)
            .map(|((((file_id, path), ts), doc), deleted)| RequestedFile {
                file_id,
                path,
                remote_timestamp: *ts,
                document_id: doc.as_deref(),
                deleted: *deleted,
            })
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationStatus {
    Success,
    Failure,
}

/// Outcome of a transfer, appended once by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub id: String,
    pub request_id: String,
    pub verifier_id: PeerId,
    pub verifier_name: String,
    pub provider_id: PeerId,
    pub timestamp: u64,
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub(crate) fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SyncRequest {
        SyncRequest {
            id: "r1".into(),
            requester_id: PeerId::from(1),
            requester_name: "alice".into(),
            provider_id: PeerId::from(2),
            provider_name: None,
            files: vec!["f1".into(), "f2".into()],
            file_paths: vec!["a.png".into(), "b/c.pdf".into()],
            remote_timestamps: vec![10, 20],
            document_ids: vec![None, Some("doc".into())],
            deletion_states: vec![false, true],
            created_at: 5,
            status: RequestStatus::Pending,
            transfer_handle: None,
            hold_signal_id: "h1".into(),
        }
    }

    #[test]
    fn test_entries_align_parallel_arrays() {
        let req = request();
        let entries: Vec<_> = req.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].path, "b/c.pdf");
        assert_eq!(entries[1].document_id, Some("doc"));
        assert!(entries[1].deleted);
        assert_eq!(entries[0].remote_timestamp, 10);
    }

    #[test]
    fn test_entries_stop_at_shortest_array() {
        let mut req = request();
        req.deletion_states.pop();
        assert_eq!(req.len(), 1);
    }

    #[test]
    fn test_request_wire_format_is_camel_case() {
        let json = serde_json::to_string(&request()).unwrap();
        assert!(json.contains("\"requesterId\":\"0000000000000001\""));
        assert!(json.contains("\"deletionStates\":[false,true]"));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("transferHandle"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Ready.is_terminal());
    }
}
