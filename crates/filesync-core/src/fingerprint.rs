//! Fingerprints of the local store, their publication into the shared map, and
//! removal of entries left behind by departed peers.

use crate::records::FileFingerprint;
use crate::shared::{FINGERPRINTS, SharedMap, SharedState, SharedStateError};
use crate::store::{FileStore, StoreError, file_name};
use crate::{PeerId, PeerIdentity};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shared state error: {0}")]
    State(#[from] SharedStateError),
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Hex SHA-256 of `content`.
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Checksum advertised for tombstones.
pub fn empty_checksum() -> String {
    checksum(&[])
}

/// Paths that never take part in sync: hidden/system segments, editor
/// temporaries and configured prefixes.
pub fn is_system_path(path: &str, ignored_prefixes: &[String]) -> bool {
    if path.split('/').any(|segment| segment.starts_with('.')) {
        return true;
    }
    if path.ends_with(".tmp") || path.ends_with(".swp") || path.ends_with('~') {
        return true;
    }
    ignored_prefixes
        .iter()
        .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
}

/// Fingerprint every syncable file and tombstone in the store, sorted by path.
///
/// A file that can't be read is left out (it will be picked up by a later
/// publish) rather than failing the whole list.
pub async fn collect(
    store: &dyn FileStore,
    owner: &PeerIdentity,
    ignored_prefixes: &[String],
) -> Result<Vec<FileFingerprint>> {
    let mut fingerprints = Vec::new();

    for record in store.list_all().await? {
        if record.sync_ignored || is_system_path(&record.path, ignored_prefixes) {
            continue;
        }

        let (checksum, size) = if record.deleted {
            (empty_checksum(), 0)
        } else {
            match store.read_path(&record.path).await {
                Ok(content) => (checksum(&content), content.len() as u64),
                Err(e) => {
                    warn!("Skipping {} in fingerprint list: {}", record.path, e);
                    continue;
                }
            }
        };

        fingerprints.push(FileFingerprint {
            file_id: record.id.clone(),
            file_name: file_name(&record.path).to_string(),
            file_path: record.path.clone(),
            last_modified: record.modified_at,
            size,
            checksum,
            owner_id: owner.id,
            owner_name: owner.name.clone(),
            linked_document_id: record.linked_document_id.clone(),
            deleted: record.deleted,
        });
    }

    fingerprints.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    Ok(fingerprints)
}

/// Replace our entry in the fingerprint map with a fresh list.
///
/// Returns the published list so callers can scan against it without
/// recomputing checksums.
pub async fn publish(
    state: &dyn SharedState,
    store: &dyn FileStore,
    owner: &PeerIdentity,
    ignored_prefixes: &[String],
) -> Result<Vec<FileFingerprint>> {
    let fingerprints = collect(store, owner, ignored_prefixes).await?;
    SharedMap::<Vec<FileFingerprint>>::new(state, FINGERPRINTS)
        .set(&owner.id.to_string(), &fingerprints)?;
    debug!("Published {} fingerprint(s) for {}", fingerprints.len(), owner.id);
    Ok(fingerprints)
}

/// Every other peer's published list. Keys that aren't peer ids and
/// undecodable lists are skipped.
pub fn remote_fingerprints(
    state: &dyn SharedState,
    self_id: PeerId,
) -> std::result::Result<BTreeMap<PeerId, Vec<FileFingerprint>>, SharedStateError> {
    let map = SharedMap::<Vec<FileFingerprint>>::new(state, FINGERPRINTS);
    let mut remotes = BTreeMap::new();
    for (key, list) in map.entries()? {
        match key.parse::<PeerId>() {
            Ok(peer) if peer != self_id => {
                remotes.insert(peer, list);
            }
            Ok(_) => {}
            Err(e) => warn!("Ignoring fingerprint entry with bad key {:?}: {}", key, e),
        }
    }
    Ok(remotes)
}

/// Remove fingerprint entries of peers that are no longer live.
///
/// Returns the ids whose entries were removed. Keys that don't parse as peer
/// ids are removed too, they can never match a live peer.
pub fn prune_departed(
    state: &dyn SharedState,
    self_id: PeerId,
    live: &HashSet<PeerId>,
) -> std::result::Result<Vec<String>, SharedStateError> {
    let map = SharedMap::<Vec<FileFingerprint>>::new(state, FINGERPRINTS);
    let mut removed = Vec::new();
    for key in map.keys()? {
        let keep = match key.parse::<PeerId>() {
            Ok(peer) => peer == self_id || live.contains(&peer),
            Err(_) => false,
        };
        if !keep {
            map.delete(&key)?;
            removed.push(key);
        }
    }
    if !removed.is_empty() {
        debug!("Pruned fingerprints of departed peers: {:?}", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::LoroState;
    use crate::store::InMemoryStore;

    fn owner() -> PeerIdentity {
        PeerIdentity::new(PeerId::from(0xa), "alice")
    }

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(
            empty_checksum(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum(b"abc").len(), 64);
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
    }

    #[test]
    fn test_system_paths() {
        let prefixes = vec!["build/".to_string()];
        assert!(is_system_path(".filesync/index.json", &prefixes));
        assert!(is_system_path("assets/.DS_Store", &prefixes));
        assert!(is_system_path("draft.tex~", &prefixes));
        assert!(is_system_path("upload.tmp", &prefixes));
        assert!(is_system_path("build/out.pdf", &prefixes));
        assert!(!is_system_path("figures/plot.png", &prefixes));
    }

    #[tokio::test]
    async fn test_collect_includes_tombstones_and_skips_ignored() {
        let store = InMemoryStore::new();
        store.insert("report.pdf", b"X", 1000, None);
        store.insert("secret.key", b"k", 1000, None);
        store.set_sync_ignored("secret.key", true);
        store.insert(".trash/old.png", b"o", 1000, None);
        store.insert("notes.tex", b"n", 1500, Some("doc-1"));
        store.delete_path("notes.tex", 2000).await.unwrap();

        let list = collect(&store, &owner(), &[]).await.unwrap();
        let paths: Vec<_> = list.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(paths, vec!["notes.tex", "report.pdf"]);

        let tombstone = &list[0];
        assert!(tombstone.deleted);
        assert_eq!(tombstone.size, 0);
        assert_eq!(tombstone.checksum, empty_checksum());
        assert_eq!(tombstone.last_modified, 2000);

        let report = &list[1];
        assert_eq!(report.checksum, checksum(b"X"));
        assert_eq!(report.file_name, "report.pdf");
        assert_eq!(report.owner_name, "alice");
    }

    #[tokio::test]
    async fn test_publish_replaces_entry() {
        let state = LoroState::new(PeerId::from(0xa)).unwrap();
        let store = InMemoryStore::new();
        store.insert("a.png", b"1", 1, None);
        publish(state.as_ref(), &store, &owner(), &[]).await.unwrap();

        store.insert("b.png", b"2", 2, None);
        publish(state.as_ref(), &store, &owner(), &[]).await.unwrap();

        let map = SharedMap::<Vec<FileFingerprint>>::new(state.as_ref(), FINGERPRINTS);
        let list = map.get(&owner().id.to_string()).unwrap().unwrap();
        assert_eq!(list.len(), 2);
        assert!(remote_fingerprints(state.as_ref(), owner().id).unwrap().is_empty());
    }

    #[test]
    fn test_prune_departed_keeps_self_and_live() {
        let state = LoroState::new(PeerId::from(1)).unwrap();
        for key in ["0000000000000001", "0000000000000002", "0000000000000003", "garbage"] {
            state.map_set(FINGERPRINTS, key, "[]".into()).unwrap();
        }
        let live: HashSet<_> = [PeerId::from(2)].into_iter().collect();

        let mut removed = prune_departed(state.as_ref(), PeerId::from(1), &live).unwrap();
        removed.sort();
        assert_eq!(removed, vec!["0000000000000003".to_string(), "garbage".to_string()]);

        let remaining = state.map_entries(FINGERPRINTS).unwrap();
        assert_eq!(remaining.len(), 2);
    }
}
