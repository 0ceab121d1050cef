//! Local file store abstraction.
//!
//! The store holds file bytes, path, metadata and deletion tombstones for one
//! participant. Implementations:
//! - `InMemoryStore` - for testing
//! - `NativeStore` (in filesync-daemon) - a directory plus a JSON metadata index

use crate::events::{EventBus, Subscription};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata of one tracked file or tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Stable identifier, preserved across rewrites of the same path
    pub id: String,
    pub path: String,
    /// Modification time in milliseconds since epoch
    pub modified_at: u64,
    pub size: u64,
    pub linked_document_id: Option<String>,
    pub deleted: bool,
    /// Explicitly excluded from sync by the user
    pub sync_ignored: bool,
}

impl FileRecord {
    /// Last path segment.
    pub fn name(&self) -> &str {
        file_name(&self.path)
    }
}

/// Options for `FileStore::write_path`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Timestamp to record instead of the local clock
    pub modified_at: Option<u64>,
    /// Document the file is linked to; `None` unlinks it
    pub linked_document_id: Option<String>,
}

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Write {
        path: String,
        content: Vec<u8>,
        options: WriteOptions,
    },
    Delete {
        path: String,
        deleted_at: u64,
    },
}

impl StoreOp {
    pub fn path(&self) -> &str {
        match self {
            StoreOp::Write { path, .. } | StoreOp::Delete { path, .. } => path,
        }
    }
}

/// Change notification fired by a store after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub path: String,
}

/// Platform-independent local file store.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Every tracked file, including tombstones.
    async fn list_all(&self) -> Result<Vec<FileRecord>>;

    /// Contents of a live file.
    async fn read_path(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file, creating it (or resurrecting a tombstone) if needed.
    async fn write_path(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()>;

    /// Delete a file, leaving a tombstone stamped with `deleted_at`.
    async fn delete_path(&self, path: &str, deleted_at: u64) -> Result<()>;

    /// Create every parent directory of `path`.
    async fn ensure_directories(&self, path: &str) -> Result<()>;

    /// Apply all operations or none of them.
    ///
    /// Deletes take effect before writes, so a batch may replace a file with
    /// a directory of the same name or the other way round.
    async fn apply_batch(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Register a callback fired after every mutation.
    fn on_change(&self, callback: Box<dyn Fn(StoreChange) + Send + Sync>) -> Subscription;
}

/// Normalize a store path: forward slashes, no leading/trailing slash, no
/// empty, `.` or `..` segments.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.replace('\\', "/");
    let trimmed = trimmed.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(trimmed.to_string())
}

/// Last segment of a path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory of a path, `None` for top-level files.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|pos| &path[..pos])
}

#[derive(Debug, Clone)]
struct StoredFile {
    id: String,
    content: Vec<u8>,
    modified_at: u64,
    linked_document_id: Option<String>,
    deleted: bool,
    sync_ignored: bool,
}

#[derive(Default, Clone)]
struct Contents {
    files: BTreeMap<String, StoredFile>,
    dirs: BTreeSet<String>,
}

impl Contents {
    /// A directory only blocks a write while live files remain under it.
    fn check_write(&self, path: &str) -> Result<()> {
        if self.dirs.contains(path) && self.has_live_files_under(path) {
            return Err(StoreError::IsDirectory(path.to_string()));
        }
        let mut ancestor = parent_path(path);
        while let Some(dir) = ancestor {
            if self.files.get(dir).is_some_and(|f| !f.deleted) {
                return Err(StoreError::InvalidPath(format!(
                    "{path}: parent {dir} is a file"
                )));
            }
            ancestor = parent_path(dir);
        }
        Ok(())
    }

    fn has_live_files_under(&self, dir: &str) -> bool {
        let prefix = format!("{dir}/");
        self.files
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .any(|(_, file)| !file.deleted)
    }

    /// Drop an empty directory tree standing where a file is written.
    fn clear_dirs_at(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.dirs.retain(|dir| dir != path && !dir.starts_with(&prefix));
    }

    /// Apply a batch: deletes first, then each write checked against the
    /// result so far.
    fn apply(&mut self, ops: Vec<StoreOp>) -> Result<()> {
        let (deletes, writes): (Vec<_>, Vec<_>) = ops
            .into_iter()
            .partition(|op| matches!(op, StoreOp::Delete { .. }));
        for op in deletes.into_iter().chain(writes) {
            match op {
                StoreOp::Write {
                    path,
                    content,
                    options,
                } => {
                    self.check_write(&path)?;
                    self.write(path, content, options);
                }
                StoreOp::Delete { path, deleted_at } => self.delete(path, deleted_at),
            }
        }
        Ok(())
    }

    fn add_parents(&mut self, path: &str) {
        let mut ancestor = parent_path(path);
        while let Some(dir) = ancestor {
            self.dirs.insert(dir.to_string());
            ancestor = parent_path(dir);
        }
    }

    fn write(&mut self, path: String, content: Vec<u8>, options: WriteOptions) {
        self.clear_dirs_at(&path);
        self.add_parents(&path);
        let modified_at = options.modified_at.unwrap_or_else(crate::now_millis);
        match self.files.get_mut(&path) {
            Some(existing) => {
                existing.content = content;
                existing.modified_at = modified_at;
                existing.linked_document_id = options.linked_document_id;
                existing.deleted = false;
            }
            None => {
                self.files.insert(
                    path,
                    StoredFile {
                        id: uuid::Uuid::new_v4().to_string(),
                        content,
                        modified_at,
                        linked_document_id: options.linked_document_id,
                        deleted: false,
                        sync_ignored: false,
                    },
                );
            }
        }
    }

    fn delete(&mut self, path: String, deleted_at: u64) {
        match self.files.get_mut(&path) {
            Some(existing) => {
                existing.content.clear();
                existing.modified_at = deleted_at;
                existing.deleted = true;
            }
            None => {
                self.files.insert(
                    path,
                    StoredFile {
                        id: uuid::Uuid::new_v4().to_string(),
                        content: Vec::new(),
                        modified_at: deleted_at,
                        linked_document_id: None,
                        deleted: true,
                        sync_ignored: false,
                    },
                );
            }
        }
    }
}

/// In-memory store for testing.
pub struct InMemoryStore {
    contents: RwLock<Contents>,
    changes: Arc<EventBus<StoreChange>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            contents: RwLock::new(Contents::default()),
            changes: Arc::new(EventBus::new()),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file with explicit metadata, for setting up test scenarios.
    pub fn insert(&self, path: &str, content: &[u8], modified_at: u64, linked_document_id: Option<&str>) {
        let options = WriteOptions {
            modified_at: Some(modified_at),
            linked_document_id: linked_document_id.map(str::to_string),
        };
        self.contents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .write(path.to_string(), content.to_vec(), options);
    }

    /// Mark a file as excluded from sync.
    pub fn set_sync_ignored(&self, path: &str, ignored: bool) {
        let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = contents.files.get_mut(path) {
            file.sync_ignored = ignored;
        }
    }

    /// Record for a path, tombstones included.
    pub fn record(&self, path: &str) -> Option<FileRecord> {
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        contents.files.get(path).map(|file| to_record(path, file))
    }

    pub fn has_directory(&self, path: &str) -> bool {
        self.contents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .dirs
            .contains(path)
    }

    fn notify(&self, paths: impl IntoIterator<Item = String>) {
        for path in paths {
            self.changes.emit(StoreChange { path });
        }
    }
}

fn to_record(path: &str, file: &StoredFile) -> FileRecord {
    FileRecord {
        id: file.id.clone(),
        path: path.to_string(),
        modified_at: file.modified_at,
        size: file.content.len() as u64,
        linked_document_id: file.linked_document_id.clone(),
        deleted: file.deleted,
        sync_ignored: file.sync_ignored,
    }
}

#[async_trait]
impl FileStore for InMemoryStore {
    async fn list_all(&self) -> Result<Vec<FileRecord>> {
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        Ok(contents
            .files
            .iter()
            .map(|(path, file)| to_record(path, file))
            .collect())
    }

    async fn read_path(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        match contents.files.get(&path) {
            Some(file) if !file.deleted => Ok(file.content.clone()),
            _ => Err(StoreError::NotFound(path)),
        }
    }

    async fn write_path(&self, path: &str, content: &[u8], options: WriteOptions) -> Result<()> {
        let path = normalize_path(path)?;
        {
            let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
            contents.check_write(&path)?;
            contents.write(path.clone(), content.to_vec(), options);
        }
        self.notify([path]);
        Ok(())
    }

    async fn delete_path(&self, path: &str, deleted_at: u64) -> Result<()> {
        let path = normalize_path(path)?;
        self.contents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .delete(path.clone(), deleted_at);
        self.notify([path]);
        Ok(())
    }

    async fn ensure_directories(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
        contents.check_write(&path)?;
        contents.add_parents(&path);
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut normalized = Vec::with_capacity(ops.len());
        for op in ops {
            normalized.push(match op {
                StoreOp::Write {
                    path,
                    content,
                    options,
                } => StoreOp::Write {
                    path: normalize_path(&path)?,
                    content,
                    options,
                },
                StoreOp::Delete { path, deleted_at } => StoreOp::Delete {
                    path: normalize_path(&path)?,
                    deleted_at,
                },
            });
        }

        let touched: Vec<String> = normalized.iter().map(|op| op.path().to_string()).collect();
        {
            let mut contents = self.contents.write().unwrap_or_else(|e| e.into_inner());
            // Work on a copy so a rejected write leaves nothing behind
            let mut next = contents.clone();
            next.apply(normalized)?;
            *contents = next;
        }
        self.notify(touched);
        Ok(())
    }

    fn on_change(&self, callback: Box<dyn Fn(StoreChange) + Send + Sync>) -> Subscription {
        self.changes.subscribe(move |change| callback(change))
    }
}
