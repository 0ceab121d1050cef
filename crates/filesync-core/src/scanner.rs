//! Divergence detection and conflict resolution.
//!
//! Everything here is a pure function of two fingerprint lists and a
//! strategy. Both sides of a pair compute the same answer independently,
//! which is what keeps them from pulling from each other at the same time.

use crate::PeerId;
use crate::config::ConflictStrategy;
use crate::records::FileFingerprint;
use std::collections::{BTreeMap, HashMap};

/// Why a remote file should be pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullReason {
    /// We don't have the file at all
    NewFile,
    /// The remote deleted it after our last modification
    Deletion,
    /// Content differs and the remote copy is more recent
    Newer,
    /// We deleted it but the remote modified it afterwards
    Resurrect,
}

/// A remote file to pull from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullTarget {
    pub file_id: String,
    pub path: String,
    pub remote_modified: u64,
    pub linked_document_id: Option<String>,
    pub deleted: bool,
    pub reason: PullReason,
}

impl PullTarget {
    fn new(remote: &FileFingerprint, reason: PullReason) -> Self {
        Self {
            file_id: remote.file_id.clone(),
            path: remote.file_path.clone(),
            remote_modified: remote.last_modified,
            linked_document_id: remote.linked_document_id.clone(),
            deleted: remote.deleted,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Pull(PullReason),
    Skip,
    /// Content differs but the strategy leaves it to the user
    Conflict,
}

fn both_linked(local: &FileFingerprint, remote: &FileFingerprint) -> bool {
    local.linked_document_id.is_some() && remote.linked_document_id.is_some()
}

fn decide(
    local: Option<&FileFingerprint>,
    remote: &FileFingerprint,
    strategy: ConflictStrategy,
) -> Decision {
    let Some(local) = local else {
        return if remote.deleted {
            Decision::Skip
        } else {
            Decision::Pull(PullReason::NewFile)
        };
    };

    // Linked text content belongs to the collaboration layer, never to file sync
    if both_linked(local, remote) {
        return Decision::Skip;
    }

    let remote_newer = remote.last_modified > local.last_modified;
    match (local.deleted, remote.deleted) {
        (true, true) => Decision::Skip,
        (false, true) if remote_newer => Decision::Pull(PullReason::Deletion),
        (false, true) => Decision::Skip,
        (true, false) if remote_newer => Decision::Pull(PullReason::Resurrect),
        (true, false) => Decision::Skip,
        (false, false) if local.checksum == remote.checksum => Decision::Skip,
        (false, false) => match strategy {
            ConflictStrategy::PreferLatest if remote_newer => Decision::Pull(PullReason::Newer),
            ConflictStrategy::PreferLatest | ConflictStrategy::PreferLocal => Decision::Skip,
            ConflictStrategy::Notify => Decision::Conflict,
        },
    }
}

fn index_by_path(local: &[FileFingerprint]) -> HashMap<&str, &FileFingerprint> {
    local.iter().map(|f| (f.file_path.as_str(), f)).collect()
}

/// Remote files we should pull from one peer, sorted by path.
pub fn compute_targets(
    local: &[FileFingerprint],
    remote: &[FileFingerprint],
    strategy: ConflictStrategy,
) -> Vec<PullTarget> {
    let by_path = index_by_path(local);
    let mut targets: Vec<PullTarget> = remote
        .iter()
        .filter_map(|r| match decide(by_path.get(r.file_path.as_str()).copied(), r, strategy) {
            Decision::Pull(reason) => Some(PullTarget::new(r, reason)),
            Decision::Skip | Decision::Conflict => None,
        })
        .collect();
    targets.sort_by(|a, b| a.path.cmp(&b.path));
    targets.dedup_by(|a, b| a.path == b.path);
    targets
}

/// Whether any peer has something worth pulling. Stops at the first hit.
pub fn compute_triggers(
    local: &[FileFingerprint],
    remote_by_peer: &BTreeMap<PeerId, Vec<FileFingerprint>>,
    strategy: ConflictStrategy,
) -> bool {
    let by_path = index_by_path(local);
    remote_by_peer.values().any(|remote| {
        remote.iter().any(|r| {
            matches!(
                decide(by_path.get(r.file_path.as_str()).copied(), r, strategy),
                Decision::Pull(_)
            )
        })
    })
}

/// Paths whose content differs and that the `notify` strategy leaves to the
/// user, paired with the remote checksum.
pub fn compute_conflicts(
    local: &[FileFingerprint],
    remote: &[FileFingerprint],
) -> Vec<(String, String)> {
    let by_path = index_by_path(local);
    let mut conflicts: Vec<_> = remote
        .iter()
        .filter(|r| {
            decide(by_path.get(r.file_path.as_str()).copied(), r, ConflictStrategy::Notify)
                == Decision::Conflict
        })
        .map(|r| (r.file_path.clone(), r.checksum.clone()))
        .collect();
    conflicts.sort();
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{checksum, empty_checksum};

    fn fp(path: &str, content: &str, modified: u64) -> FileFingerprint {
        FileFingerprint {
            file_id: format!("id-{path}-{modified}"),
            file_name: path.rsplit('/').next().unwrap().to_string(),
            file_path: path.to_string(),
            last_modified: modified,
            size: content.len() as u64,
            checksum: checksum(content.as_bytes()),
            owner_id: PeerId::from(1),
            owner_name: "peer".into(),
            linked_document_id: None,
            deleted: false,
        }
    }

    fn tombstone(path: &str, modified: u64) -> FileFingerprint {
        FileFingerprint {
            size: 0,
            checksum: empty_checksum(),
            deleted: true,
            ..fp(path, "", modified)
        }
    }

    fn linked(mut f: FileFingerprint, doc: &str) -> FileFingerprint {
        f.linked_document_id = Some(doc.to_string());
        f
    }

    const ALL: [ConflictStrategy; 3] = [
        ConflictStrategy::PreferLatest,
        ConflictStrategy::PreferLocal,
        ConflictStrategy::Notify,
    ];

    #[test]
    fn test_new_remote_file_is_pulled() {
        let targets = compute_targets(&[], &[fp("report.pdf", "X", 1000)], ConflictStrategy::PreferLocal);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].reason, PullReason::NewFile);
        assert_eq!(targets[0].remote_modified, 1000);
    }

    #[test]
    fn test_remote_tombstone_for_unknown_file_is_ignored() {
        for strategy in ALL {
            assert!(compute_targets(&[], &[tombstone("gone.png", 5)], strategy).is_empty());
        }
    }

    #[test]
    fn test_identical_files_never_pulled() {
        for strategy in ALL {
            let local = [fp("a.png", "same", 1)];
            let remote = [fp("a.png", "same", 9999)];
            assert!(compute_targets(&local, &remote, strategy).is_empty());

            let local = [tombstone("b.png", 1)];
            let remote = [tombstone("b.png", 9999)];
            assert!(compute_targets(&local, &remote, strategy).is_empty());
        }
    }

    #[test]
    fn test_newer_remote_deletion_is_pulled() {
        let local = [fp("notes.tex", "body", 1500)];
        let remote = [tombstone("notes.tex", 2000)];
        let targets = compute_targets(&local, &remote, ConflictStrategy::PreferLocal);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].reason, PullReason::Deletion);
        assert!(targets[0].deleted);

        let stale = [tombstone("notes.tex", 1000)];
        assert!(compute_targets(&local, &stale, ConflictStrategy::PreferLatest).is_empty());
    }

    #[test]
    fn test_newer_remote_resurrects_local_tombstone() {
        let local = [tombstone("a.png", 100)];
        let targets = compute_targets(&local, &[fp("a.png", "v2", 200)], ConflictStrategy::PreferLocal);
        assert_eq!(targets[0].reason, PullReason::Resurrect);
        assert!(compute_targets(&local, &[fp("a.png", "v1", 50)], ConflictStrategy::PreferLatest).is_empty());
    }

    #[test]
    fn test_prefer_latest_pulls_iff_remote_newer() {
        let local = [fp("a.png", "mine", 100)];
        for (remote_time, expected) in [(99, false), (100, false), (101, true)] {
            let remote = [fp("a.png", "theirs", remote_time)];
            let targets = compute_targets(&local, &remote, ConflictStrategy::PreferLatest);
            assert_eq!(!targets.is_empty(), expected, "remote mtime {remote_time}");
        }
    }

    #[test]
    fn test_prefer_local_and_notify_never_pull_conflicts() {
        let local = [fp("a.png", "mine", 100)];
        let remote = [fp("a.png", "theirs", 500)];
        assert!(compute_targets(&local, &remote, ConflictStrategy::PreferLocal).is_empty());
        assert!(compute_targets(&local, &remote, ConflictStrategy::Notify).is_empty());
        assert_eq!(
            compute_conflicts(&local, &remote),
            vec![("a.png".to_string(), checksum(b"theirs"))]
        );
    }

    #[test]
    fn test_both_linked_never_pulled() {
        for strategy in ALL {
            for (l, r) in [
                (fp("main.tex", "a", 1), fp("main.tex", "b", 1000)),
                (fp("main.tex", "a", 1), tombstone("main.tex", 1000)),
                (tombstone("main.tex", 1), fp("main.tex", "b", 1000)),
            ] {
                let local = [linked(l, "doc-1")];
                let remote = [linked(r, "doc-1")];
                assert!(compute_targets(&local, &remote, strategy).is_empty());
            }
        }
    }

    #[test]
    fn test_one_side_linked_follows_strategy() {
        let local = [linked(fp("fig.png", "a", 1), "doc-1")];
        let remote = [fp("fig.png", "b", 1000)];
        assert_eq!(compute_targets(&local, &remote, ConflictStrategy::PreferLatest).len(), 1);
    }

    #[test]
    fn test_targets_are_deterministic_and_sorted() {
        let local = [fp("b.png", "1", 1)];
        let remote = [fp("z.png", "z", 1), fp("b.png", "2", 5), fp("a.png", "a", 1)];
        let first = compute_targets(&local, &remote, ConflictStrategy::PreferLatest);
        let second = compute_targets(&local, &remote, ConflictStrategy::PreferLatest);
        assert_eq!(first, second);
        let paths: Vec<_> = first.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["a.png", "b.png", "z.png"]);
    }

    #[test]
    fn test_triggers_match_targets() {
        let local = [fp("a.png", "1", 1)];
        let mut remotes = BTreeMap::new();
        remotes.insert(PeerId::from(2), vec![fp("a.png", "1", 1)]);
        assert!(!compute_triggers(&local, &remotes, ConflictStrategy::PreferLatest));

        remotes.insert(PeerId::from(3), vec![fp("new.png", "n", 1)]);
        assert!(compute_triggers(&local, &remotes, ConflictStrategy::PreferLatest));
    }
}
