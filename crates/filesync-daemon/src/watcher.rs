//! Debounced watcher for a synced directory.
//!
//! Events only wake the coordinator; the store rescans the directory on the
//! next publish, so the watcher doesn't need to be exact.

use crate::native_store::META_DIR;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Change observed under a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Index of the watched directory this event belongs to
    pub source: usize,
    /// Path relative to the directory root
    pub path: String,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// Created or modified
    Modified,
    Deleted,
}

type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

/// Watches one directory and forwards relevant events to a shared channel.
pub struct FileWatcher {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(
        source: usize,
        root: PathBuf,
        events: mpsc::UnboundedSender<FileEvent>,
    ) -> notify::Result<Self> {
        // FSEvents reports canonical paths (/private/var/... on macOS)
        let root = root.canonicalize().unwrap_or(root);
        let watch_root = root.clone();
        let mtimes: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(batch) => {
                    for event in batch {
                        if let Some(file_event) = classify(source, &event.path, &watch_root, &mtimes)
                        {
                            if events.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching {:?}", root);

        Ok(Self {
            root,
            _debouncer: debouncer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Skips store metadata and hidden entries.
fn is_watched(relative: &str) -> bool {
    relative != META_DIR
        && !relative.starts_with(&format!("{META_DIR}/"))
        && !relative.split('/').any(|segment| segment.starts_with('.'))
}

fn classify(source: usize, path: &Path, root: &Path, mtimes: &MtimeCache) -> Option<FileEvent> {
    let relative = path
        .strip_prefix(root)
        .ok()?
        .to_str()?
        .replace('\\', "/");
    if relative.is_empty() || !is_watched(&relative) {
        return None;
    }

    let mut cache = mtimes.lock().unwrap_or_else(|e| e.into_inner());
    let kind = match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => return None,
        Ok(metadata) => {
            // Some mounts report events without a content change
            if let Ok(mtime) = metadata.modified() {
                if cache.get(&relative) == Some(&mtime) {
                    return None;
                }
                cache.insert(relative.clone(), mtime);
            }
            FileEventKind::Modified
        }
        Err(_) => {
            // A removed directory may be reported only by its own path
            let prefix = format!("{relative}/");
            cache.retain(|path, _| path != &relative && !path.starts_with(&prefix));
            FileEventKind::Deleted
        }
    };

    debug!("File event: {:?} - {}", kind, relative);
    Some(FileEvent {
        source,
        path: relative,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_watched() {
        assert!(is_watched("figure.png"));
        assert!(is_watched("src/main.tex"));
        assert!(!is_watched(".filesync"));
        assert!(!is_watched(".filesync/index.json"));
        assert!(!is_watched(".git/HEAD"));
        assert!(!is_watched("src/.hidden"));
    }

    #[test]
    fn test_classify_filters_unchanged_mtime() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let file = root.join("a.bin");
        std::fs::write(&file, b"a").unwrap();
        let cache: MtimeCache = Arc::default();

        let first = classify(3, &file, &root, &cache).unwrap();
        assert_eq!(first.source, 3);
        assert_eq!(first.path, "a.bin");
        assert_eq!(first.kind, FileEventKind::Modified);
        assert!(classify(3, &file, &root, &cache).is_none());

        std::fs::remove_file(&file).unwrap();
        let deleted = classify(3, &file, &root, &cache).unwrap();
        assert_eq!(deleted.kind, FileEventKind::Deleted);
        assert!(cache.lock().unwrap().is_empty());
    }

    #[test]
    fn test_removed_directory_drops_cached_children() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("figs")).unwrap();
        std::fs::write(root.join("figs/a.png"), b"a").unwrap();
        std::fs::write(root.join("figs/b.png"), b"b").unwrap();
        std::fs::write(root.join("figs.txt"), b"keep").unwrap();
        let cache: MtimeCache = Arc::default();

        for name in ["figs/a.png", "figs/b.png", "figs.txt"] {
            classify(0, &root.join(name), &root, &cache).unwrap();
        }
        assert_eq!(cache.lock().unwrap().len(), 3);

        std::fs::remove_dir_all(root.join("figs")).unwrap();
        let event = classify(0, &root.join("figs"), &root, &cache).unwrap();
        assert_eq!(event.kind, FileEventKind::Deleted);

        let cache = cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("figs.txt"));
    }

    #[test]
    fn test_classify_ignores_directories_and_metadata() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(META_DIR)).unwrap();
        std::fs::write(root.join(META_DIR).join("index.json"), b"{}").unwrap();
        let cache: MtimeCache = Arc::default();

        assert!(classify(0, &root.join("sub"), &root, &cache).is_none());
        assert!(classify(0, &root.join(META_DIR).join("index.json"), &root, &cache).is_none());
    }
}
