// ── rumo-watch / watch module ─────────────────────────────────────────────────

pub mod classify;
pub mod coalescer;
pub mod error;
pub mod recovery;
pub mod watcher;

pub use classify::{classify, raw_kind, ChangeClass, Existence, RawEventKind};
pub use coalescer::{ChangeCoalescer, SequenceTracker, DEFAULT_DEBOUNCE};
pub use error::{WatchError, WatchResult};
pub use recovery::{run_with_retry, SyncAction};
pub use watcher::{DirectoryWatcher, WatchSettings, WatchStrategy};
