//! filesync-daemon library: the native pieces of the daemon.
//!
//! Exposed as a library so integration tests can drive a session directly.

pub mod config;
pub mod native_store;
pub mod session;
pub mod watcher;

pub use config::{ConfigError, Overrides};
pub use native_store::NativeStore;
pub use session::{LocalSession, Participant, SessionError, Signal};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
