//! Directory-backed file store.
//!
//! File bytes live in the directory itself. Metadata the filesystem can't
//! hold (stable file ids, document links, deletion tombstones) lives in
//! `.filesync/index.json`. Batches are written into `.filesync/staging/` first
//! and renamed into place once every payload is on disk.

use async_trait::async_trait;
use filesync_core::events::{EventBus, Subscription};
use filesync_core::store::{
    FileRecord, FileStore, Result, StoreChange, StoreError, StoreOp, WriteOptions, normalize_path,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Directory holding the store's own metadata.
pub const META_DIR: &str = ".filesync";
const INDEX_FILE: &str = "index.json";
const STAGING_DIR: &str = "staging";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    linked_document_id: Option<String>,
    #[serde(default)]
    deleted: bool,
    /// When the tombstone was recorded
    #[serde(default)]
    deleted_at: u64,
    #[serde(default)]
    sync_ignored: bool,
}

impl IndexEntry {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            linked_document_id: None,
            deleted: false,
            deleted_at: 0,
            sync_ignored: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    files: BTreeMap<String, IndexEntry>,
}

struct Walk {
    files: BTreeMap<String, std::fs::Metadata>,
    dirs: Vec<PathBuf>,
}

fn io_err(path: &str, e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
        _ => StoreError::Io(format!("{path}: {e}")),
    }
}

fn mtime_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Directory-backed store for the daemon.
pub struct NativeStore {
    root: PathBuf,
    index: Mutex<Index>,
    changes: Arc<EventBus<StoreChange>>,
}

impl NativeStore {
    /// Open (or initialize) a store rooted at `root`.
    pub async fn open(root: PathBuf) -> Result<Self> {
        // Payloads left behind by an interrupted batch are never renamed
        let staging = root.join(META_DIR).join(STAGING_DIR);
        match fs::remove_dir_all(&staging).await {
            Ok(()) => debug!("Cleared staging directory {:?}", staging),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(STAGING_DIR, e)),
        }
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| io_err(META_DIR, e))?;

        let index_path = root.join(META_DIR).join(INDEX_FILE);
        let index = match fs::read_to_string(&index_path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring unreadable store index {:?}: {}", index_path, e);
                Index::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(io_err(INDEX_FILE, e)),
        };
        debug!("Opened store at {:?} ({} indexed file(s))", root, index.files.len());

        Ok(Self {
            root,
            index: Mutex::new(index),
            changes: Arc::new(EventBus::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclude a path from sync (or include it again).
    pub async fn set_sync_ignored(&self, path: &str, ignored: bool) -> Result<()> {
        let path = normalize_path(path)?;
        let mut index = self.index.lock().await;
        index
            .files
            .entry(path)
            .or_insert_with(IndexEntry::new)
            .sync_ignored = ignored;
        self.save_index(&index).await
    }

    /// Link a file to a collaborative document (or unlink it).
    pub async fn set_linked_document(&self, path: &str, document_id: Option<String>) -> Result<()> {
        let path = normalize_path(path)?;
        let mut index = self.index.lock().await;
        index
            .files
            .entry(path)
            .or_insert_with(IndexEntry::new)
            .linked_document_id = document_id;
        self.save_index(&index).await
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn save_index(&self, index: &Index) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(index).map_err(|e| StoreError::Io(e.to_string()))?;
        let path = self.root.join(META_DIR).join(INDEX_FILE);
        let tmp = self.root.join(META_DIR).join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, contents)
            .await
            .map_err(|e| io_err(INDEX_FILE, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(INDEX_FILE, e))
    }

    /// Every regular file under the root, except our own metadata.
    async fn scan(&self) -> Result<BTreeMap<String, std::fs::Metadata>> {
        Ok(self.walk(self.root.clone()).await?.files)
    }

    /// Regular files and directories below `start`, keyed relative to the root.
    async fn walk(&self, start: PathBuf) -> Result<Walk> {
        let mut found = BTreeMap::new();
        let mut subdirs = Vec::new();
        let mut dirs = vec![start];

        while let Some(dir) = dirs.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::Io(format!("{dir:?}: {e}")))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::Io(format!("{dir:?}: {e}")))?
            {
                let full = entry.path();
                let Ok(relative) = full.strip_prefix(&self.root) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                if relative == META_DIR {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Skipping {}: {}", relative, e);
                        continue;
                    }
                };
                if metadata.is_dir() {
                    subdirs.push(full.clone());
                    dirs.push(full);
                } else if metadata.is_file() {
                    found.insert(relative, metadata);
                }
            }
        }
        Ok(Walk {
            files: found,
            dirs: subdirs,
        })
    }

    /// Reject writes whose target is a directory or whose ancestor is a file.
    ///
    /// Files in `deleted` count as already gone, so a directory holding
    /// nothing else is not in the way.
    async fn check_write(&self, path: &str, deleted: &HashSet<String>) -> Result<()> {
        let full = self.full_path(path);
        if fs::metadata(&full).await.is_ok_and(|m| m.is_dir()) {
            let walk = self.walk(full).await?;
            if walk.files.keys().any(|file| !deleted.contains(file)) {
                return Err(StoreError::IsDirectory(path.to_string()));
            }
        }
        let mut ancestor = Path::new(path).parent();
        while let Some(dir) = ancestor.filter(|d| !d.as_os_str().is_empty()) {
            let key = dir.to_string_lossy().replace('\\', "/");
            if deleted.contains(&key) {
                ancestor = dir.parent();
                continue;
            }
            if let Ok(metadata) = fs::metadata(self.root.join(dir)).await {
                if metadata.is_file() {
                    return Err(StoreError::InvalidPath(format!(
                        "{path}: parent {} is a file",
                        dir.display()
                    )));
                }
            }
            ancestor = dir.parent();
        }
        Ok(())
    }

    async fn set_mtime(&self, path: &str, modified_at: u64) -> Result<()> {
        let full = self.full_path(path);
        let mtime = filetime::FileTime::from_system_time(
            UNIX_EPOCH + Duration::from_millis(modified_at),
        );
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&full, mtime))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .map_err(|e| io_err(path, e))
    }

    async fn create_parents(&self, path: &str) -> Result<()> {
        if let Some(parent) = self.full_path(path).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(path, e))?;
        }
        Ok(())
    }

    fn record_write(index: &mut Index, path: &str, options: &WriteOptions) {
        let entry = index
            .files
            .entry(path.to_string())
            .or_insert_with(IndexEntry::new);
        entry.linked_document_id = options.linked_document_id.clone();
        entry.deleted = false;
        entry.deleted_at = 0;
    }

    fn record_delete(index: &mut Index, path: &str, deleted_at: u64) {
        let entry = index
            .files
            .entry(path.to_string())
            .or_insert_with(IndexEntry::new);
        entry.deleted = true;
        entry.deleted_at = deleted_at;
    }

    /// Remove a file. A directory at the path is left alone: the tombstone
    /// is for a file that no longer exists here.
    async fn remove_file(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        if fs::metadata(&full).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }
        match fs::remove_file(full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        }
    }

    /// Remove an empty directory tree standing where a file is about to go.
    /// Fails if a file has appeared inside it.
    async fn clear_way(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        if !fs::metadata(&full).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }
        let mut dirs = self.walk(full.clone()).await?.dirs;
        // Deepest first
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        dirs.push(full);
        for dir in dirs {
            fs::remove_dir(&dir).await.map_err(|e| io_err(path, e))?;
        }
        debug!("Removed empty directory {} to make room for a file", path);
        Ok(())
    }

    /// Move one staged payload into place and record it.
    async fn place(
        &self,
        index: &mut Index,
        path: &str,
        tmp: &Path,
        options: &WriteOptions,
    ) -> Result<()> {
        self.clear_way(path).await?;
        self.create_parents(path).await?;
        fs::rename(tmp, self.full_path(path))
            .await
            .map_err(|e| io_err(path, e))?;
        Self::record_write(index, path, options);
        if let Some(modified_at) = options.modified_at {
            self.set_mtime(path, modified_at).await?;
        }
        Ok(())
    }

    fn notify(&self, paths: impl IntoIterator<Item = String>) {
        for path in paths {
            self.changes.emit(StoreChange { path });
        }
    }
}

#[async_trait]
impl FileStore for NativeStore {
    /// Reconciles the index with the directory: new files get ids, files
    /// removed outside the store become tombstones.
    async fn list_all(&self) -> Result<Vec<FileRecord>> {
        let on_disk = self.scan().await?;
        let mut index = self.index.lock().await;
        let mut dirty = false;
        let mut records = Vec::with_capacity(on_disk.len());

        for (path, metadata) in &on_disk {
            let entry = index.files.entry(path.clone()).or_insert_with(|| {
                dirty = true;
                IndexEntry::new()
            });
            if entry.deleted {
                // Recreated outside the store
                entry.deleted = false;
                entry.deleted_at = 0;
                dirty = true;
            }
            records.push(FileRecord {
                id: entry.id.clone(),
                path: path.clone(),
                modified_at: mtime_millis(metadata),
                size: metadata.len(),
                linked_document_id: entry.linked_document_id.clone(),
                deleted: false,
                sync_ignored: entry.sync_ignored,
            });
        }

        let now = filesync_core::now_millis();
        for (path, entry) in index.files.iter_mut() {
            if on_disk.contains_key(path) {
                continue;
            }
            if !entry.deleted {
                debug!("{} removed outside the store, recording tombstone", path);
                entry.deleted = true;
                entry.deleted_at = now;
                dirty = true;
            }
            records.push(FileRecord {
                id: entry.id.clone(),
                path: path.clone(),
                modified_at: entry.deleted_at,
                size: 0,
                linked_document_id: entry.linked_document_id.clone(),
                deleted: true,
                sync_ignored: entry.sync_ignored,
            });
        }

        if dirty {
            self.save_index(&index).await?;
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    async fn read_path(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        let full = self.full_path(&path);
        if fs::metadata(&full).await.is_ok_and(|m| m.is_dir()) {
            return Err(StoreError::IsDirectory(path));
        }
        fs::read(&full).await.map_err(|e| io_err(&path, e))
    }

    async fn write_path(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()> {
        let path = normalize_path(path)?;
        let mut index = self.index.lock().await;
        self.check_write(&path, &HashSet::new()).await?;
        self.clear_way(&path).await?;
        self.create_parents(&path).await?;
        fs::write(self.full_path(&path), content)
            .await
            .map_err(|e| io_err(&path, e))?;
        if let Some(modified_at) = options.modified_at {
            self.set_mtime(&path, modified_at).await?;
        }
        Self::record_write(&mut index, &path, &options);
        self.save_index(&index).await?;
        drop(index);
        self.notify([path]);
        Ok(())
    }

    async fn delete_path(&self, path: &str, deleted_at: u64) -> Result<()> {
        let path = normalize_path(path)?;
        let mut index = self.index.lock().await;
        self.remove_file(&path).await?;
        Self::record_delete(&mut index, &path, deleted_at);
        self.save_index(&index).await?;
        drop(index);
        self.notify([path]);
        Ok(())
    }

    async fn ensure_directories(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.check_write(&path, &HashSet::new()).await?;
        self.create_parents(&path).await
    }

    /// Deletes are applied before writes, and writes are validated against
    /// the directory as it will be once those deletes are done.
    async fn apply_batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        for op in ops {
            match op {
                StoreOp::Write {
                    path,
                    content,
                    options,
                } => writes.push((normalize_path(&path)?, content, options)),
                StoreOp::Delete { path, deleted_at } => {
                    deletes.push((normalize_path(&path)?, deleted_at))
                }
            }
        }
        let deleted: HashSet<String> = deletes.iter().map(|(path, _)| path.clone()).collect();

        let mut index = self.index.lock().await;

        // Validate and stage every payload before touching any target
        let staging = self.root.join(META_DIR).join(STAGING_DIR);
        let mut staged: Vec<Option<PathBuf>> = Vec::with_capacity(writes.len());
        let mut failure = None;
        for (path, content, _) in &writes {
            if let Err(e) = self.check_write(path, &deleted).await {
                failure = Some(e);
                break;
            }
            let tmp = staging.join(uuid::Uuid::new_v4().to_string());
            if let Err(e) = fs::write(&tmp, content).await {
                failure = Some(io_err(path, e));
                break;
            }
            staged.push(Some(tmp));
        }
        if let Some(e) = failure {
            discard_staged(staged).await;
            return Err(e);
        }

        let mut touched = Vec::with_capacity(deletes.len() + writes.len());
        let mut outcome = Ok(());
        for (path, deleted_at) in &deletes {
            if let Err(e) = self.remove_file(path).await {
                outcome = Err(e);
                break;
            }
            Self::record_delete(&mut index, path, *deleted_at);
            touched.push(path.clone());
        }
        if outcome.is_ok() {
            for ((path, _, options), tmp) in writes.iter().zip(staged.iter_mut()) {
                let Some(staged_path) = tmp.as_deref() else {
                    continue;
                };
                if let Err(e) = self.place(&mut index, path, staged_path, options).await {
                    // The file may already be in place if only the mtime failed
                    if fs::metadata(staged_path).await.is_err() {
                        *tmp = None;
                        touched.push(path.clone());
                    }
                    outcome = Err(e);
                    break;
                }
                *tmp = None;
                touched.push(path.clone());
            }
        }

        // Whatever was applied stays recorded, even when the batch stopped early
        discard_staged(staged).await;
        let saved = self.save_index(&index).await;
        drop(index);
        self.notify(touched.iter().cloned());

        match &outcome {
            Ok(()) => debug!("Applied batch of {} operation(s)", touched.len()),
            Err(e) => warn!("Batch stopped after {} operation(s): {}", touched.len(), e),
        }
        outcome.and(saved)
    }

    fn on_change(&self, callback: Box<dyn Fn(StoreChange) + Send + Sync>) -> Subscription {
        self.changes.subscribe(move |change| callback(change))
    }
}

async fn discard_staged(staged: Vec<Option<PathBuf>>) {
    for tmp in staged.into_iter().flatten() {
        if let Err(e) = fs::remove_file(&tmp).await {
            warn!("Failed to remove staged payload {:?}: {}", tmp, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, NativeStore) {
        let dir = TempDir::new().unwrap();
        let store = NativeStore::open(dir.path().to_path_buf()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_sets_mtime_and_link() {
        let (_dir, store) = store().await;
        store
            .write_path(
                "figs/plot.png",
                b"png",
                WriteOptions {
                    modified_at: Some(1_600_000_000_123),
                    linked_document_id: Some("doc-1".into()),
                },
            )
            .await
            .unwrap();

        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "figs/plot.png");
        assert_eq!(records[0].modified_at, 1_600_000_000_123);
        assert_eq!(records[0].linked_document_id.as_deref(), Some("doc-1"));
        assert_eq!(store.read_path("figs/plot.png").await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_external_changes_are_picked_up() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let first = store.list_all().await.unwrap();
        assert_eq!(first.len(), 1);
        let id = first[0].id.clone();

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        let second = store.list_all().await.unwrap();
        assert!(second[0].deleted);
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].size, 0);

        std::fs::write(dir.path().join("a.txt"), b"again").unwrap();
        let third = store.list_all().await.unwrap();
        assert!(!third[0].deleted);
        assert_eq!(third[0].id, id);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let (dir, store) = store().await;
        store.write_path("a.txt", b"a", WriteOptions::default()).await.unwrap();
        store.delete_path("a.txt", 42).await.unwrap();
        let id = store.list_all().await.unwrap()[0].id.clone();
        drop(store);

        let reopened = NativeStore::open(dir.path().to_path_buf()).await.unwrap();
        let records = reopened.list_all().await.unwrap();
        assert_eq!(records[0].id, id);
        assert!(records[0].deleted);
        assert_eq!(records[0].modified_at, 42);
    }

    #[tokio::test]
    async fn test_batch_rejected_as_a_whole() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("blocker"), b"file").unwrap();

        let result = store
            .apply_batch(vec![
                StoreOp::Write {
                    path: "ok.txt".into(),
                    content: b"ok".to_vec(),
                    options: WriteOptions::default(),
                },
                StoreOp::Write {
                    path: "blocker/inner.txt".into(),
                    content: b"no".to_vec(),
                    options: WriteOptions::default(),
                },
            ])
            .await;

        assert!(result.is_err());
        assert!(!dir.path().join("ok.txt").exists());
        let staging = std::fs::read_dir(dir.path().join(META_DIR).join(STAGING_DIR)).unwrap();
        assert_eq!(staging.count(), 0);
    }

    #[tokio::test]
    async fn test_batch_writes_and_deletes() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("old.txt"), b"old").unwrap();
        store.list_all().await.unwrap();

        store
            .apply_batch(vec![
                StoreOp::Write {
                    path: "new/file.txt".into(),
                    content: b"new".to_vec(),
                    options: WriteOptions {
                        modified_at: Some(1_700_000_000_000),
                        linked_document_id: None,
                    },
                },
                StoreOp::Delete {
                    path: "old.txt".into(),
                    deleted_at: 1_700_000_000_500,
                },
            ])
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("new/file.txt")).unwrap(), b"new");
        assert!(!dir.path().join("old.txt").exists());

        let records = store.list_all().await.unwrap();
        let old = records.iter().find(|r| r.path == "old.txt").unwrap();
        assert!(old.deleted);
        assert_eq!(old.modified_at, 1_700_000_000_500);
    }

    #[tokio::test]
    async fn test_metadata_dir_is_not_listed() {
        let (_dir, store) = store().await;
        store.write_path("a.txt", b"a", WriteOptions::default()).await.unwrap();
        let paths: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["a.txt".to_string()]);
    }

    fn write(path: &str, content: &[u8]) -> StoreOp {
        StoreOp::Write {
            path: path.into(),
            content: content.to_vec(),
            options: WriteOptions {
                modified_at: Some(1_700_000_000_000),
                linked_document_id: None,
            },
        }
    }

    fn delete(path: &str) -> StoreOp {
        StoreOp::Delete {
            path: path.into(),
            deleted_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_file_replaced_by_directory() {
        let (dir, store) = store().await;
        store.write_path("figs", b"file", WriteOptions::default()).await.unwrap();

        store
            .apply_batch(vec![delete("figs"), write("figs/plot.png", b"png")])
            .await
            .unwrap();

        assert!(dir.path().join("figs").is_dir());
        assert_eq!(std::fs::read(dir.path().join("figs/plot.png")).unwrap(), b"png");
        let records = store.list_all().await.unwrap();
        assert!(records.iter().any(|r| r.path == "figs" && r.deleted));
        assert!(records.iter().any(|r| r.path == "figs/plot.png" && !r.deleted));
    }

    #[tokio::test]
    async fn test_directory_replaced_by_file() {
        let (dir, store) = store().await;
        store
            .write_path("figs/sub/plot.png", b"png", WriteOptions::default())
            .await
            .unwrap();

        store
            .apply_batch(vec![write("figs", b"file"), delete("figs/sub/plot.png")])
            .await
            .unwrap();

        assert!(dir.path().join("figs").is_file());
        assert_eq!(store.read_path("figs").await.unwrap(), b"file");
    }

    #[tokio::test]
    async fn test_directory_with_other_files_stays() {
        let (dir, store) = store().await;
        store.write_path("figs/a.png", b"a", WriteOptions::default()).await.unwrap();
        store.write_path("figs/b.png", b"b", WriteOptions::default()).await.unwrap();

        let result = store
            .apply_batch(vec![delete("figs/a.png"), write("figs", b"file")])
            .await;

        assert!(matches!(result, Err(StoreError::IsDirectory(_))));
        assert!(dir.path().join("figs/a.png").exists());
        assert!(dir.path().join("figs/b.png").exists());
    }

    #[tokio::test]
    async fn test_interrupted_batch_keeps_what_was_applied() {
        let (dir, store) = store().await;
        let linked = StoreOp::Write {
            path: "a.txt".into(),
            content: b"a".to_vec(),
            options: WriteOptions {
                modified_at: None,
                linked_document_id: Some("doc-a".into()),
            },
        };

        // "p" lands as a file, so "p/q" can't get its parent directory
        let result = store
            .apply_batch(vec![linked, write("p", b"p"), write("p/q", b"q")])
            .await;
        assert!(result.is_err());

        let staging = std::fs::read_dir(dir.path().join(META_DIR).join(STAGING_DIR)).unwrap();
        assert_eq!(staging.count(), 0);

        let id = store.list_all().await.unwrap()[0].id.clone();
        drop(store);
        let reopened = NativeStore::open(dir.path().to_path_buf()).await.unwrap();
        let records = reopened.list_all().await.unwrap();
        let a = records.iter().find(|r| r.path == "a.txt").unwrap();
        assert_eq!(a.id, id);
        assert_eq!(a.linked_document_id.as_deref(), Some("doc-a"));
        assert!(records.iter().any(|r| r.path == "p" && !r.deleted));
        assert!(!records.iter().any(|r| r.path == "p/q"));
    }

    #[tokio::test]
    async fn test_open_clears_leftover_staging() {
        let (dir, store) = store().await;
        drop(store);
        let leftover = dir.path().join(META_DIR).join(STAGING_DIR).join("stale");
        std::fs::write(&leftover, b"half a payload").unwrap();

        let _store = NativeStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(!leftover.exists());
        assert!(dir.path().join(META_DIR).join(STAGING_DIR).is_dir());
    }
}
