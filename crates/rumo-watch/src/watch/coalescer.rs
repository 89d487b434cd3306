// ── ChangeCoalescer – per-path debounce ──────────────────────────────────────
//
// At most one scheduled, not-yet-fired upload per path.  A new change for the
// same path cancels the scheduled one and restarts the window.  Once a timer
// fires its entry is gone, so an upload in flight is never cancelled; the
// per-path sequence numbers decide which completion counts.

use crate::watch::recovery::{run_with_retry, SyncAction};
use log::debug;
use rumo_core::NotificationSink;
use rumo_sftp::{RemoteSyncClient, SyncResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

struct PendingChange {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PathSequence {
    last_dispatched: u64,
    highest_completed: u64,
    in_flight: usize,
}

/// Per-path dispatch / completion counters.  A path is forgotten once
/// nothing is in flight for it.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    paths: HashMap<PathBuf, PathSequence>,
}

impl SequenceTracker {
    /// Assign the next sequence number for `path`.
    pub fn begin(&mut self, path: &Path) -> u64 {
        let entry = self.paths.entry(path.to_path_buf()).or_default();
        entry.last_dispatched += 1;
        entry.in_flight += 1;
        entry.last_dispatched
    }

    /// Record completion; `true` when `seq` is the newest completion so far.
    pub fn complete(&mut self, path: &Path, seq: u64) -> bool {
        let Some(entry) = self.paths.get_mut(path) else {
            return true;
        };
        entry.in_flight = entry.in_flight.saturating_sub(1);
        let latest = seq > entry.highest_completed;
        if latest {
            entry.highest_completed = seq;
        }
        if entry.in_flight == 0 {
            self.paths.remove(path);
        }
        latest
    }

    pub fn is_superseded(&self, path: &Path, seq: u64) -> bool {
        self.paths
            .get(path)
            .map(|s| s.last_dispatched > seq)
            .unwrap_or(false)
    }

    /// Paths with an upload in flight.
    pub fn tracked_paths(&self) -> usize {
        self.paths.len()
    }
}

struct CoalescerInner {
    client: Arc<RemoteSyncClient>,
    notifier: Arc<dyn NotificationSink>,
    debounce: Duration,
    pending: Mutex<HashMap<PathBuf, PendingChange>>,
    sequences: Mutex<SequenceTracker>,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct ChangeCoalescer {
    inner: Arc<CoalescerInner>,
}

impl ChangeCoalescer {
    pub fn new(client: Arc<RemoteSyncClient>, debounce: Duration) -> Self {
        let notifier = client.notifier();
        Self {
            inner: Arc::new(CoalescerInner {
                client,
                notifier,
                debounce,
                pending: Mutex::new(HashMap::new()),
                sequences: Mutex::new(SequenceTracker::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Schedule an upload of `path` one debounce window from now, replacing
    /// any upload already scheduled for it.
    pub fn notify_change(&self, path: PathBuf) {
        CoalescerInner::schedule(&self.inner, path);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.inner.pending().contains_key(path)
    }

    /// Drop every scheduled upload.  Uploads already running are unaffected.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingChange> = self.inner.pending().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            debug!("Cancelling {} scheduled upload(s)", drained.len());
        }
        for change in drained {
            change.handle.abort();
        }
    }
}

impl CoalescerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingChange>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sequences(&self) -> MutexGuard<'_, SequenceTracker> {
        self.sequences.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn schedule(this: &Arc<Self>, path: PathBuf) {
        let generation = this.next_generation.fetch_add(1, Ordering::Relaxed);

        // Hold the table while spawning so the timer can never look up its
        // entry before it is inserted.
        let mut pending = this.pending();
        let handle = tokio::spawn({
            let inner = this.clone();
            let path = path.clone();
            async move {
                tokio::time::sleep(inner.debounce).await;
                CoalescerInner::fire(&inner, path, generation).await;
            }
        });
        if let Some(previous) = pending.insert(path.clone(), PendingChange { generation, handle }) {
            previous.handle.abort();
            debug!("Debounce restarted for {}", path.display());
        }
    }

    async fn fire(this: &Arc<Self>, path: PathBuf, generation: u64) {
        {
            let mut pending = this.pending();
            match pending.get(&path) {
                Some(entry) if entry.generation == generation => {
                    pending.remove(&path);
                }
                _ => return,
            }
        }

        let seq = this.sequences().begin(&path);
        debug!("Uploading changed file {} (seq {})", path.display(), seq);
        let result = run_with_retry(&this.client, SyncAction::Upload, &path, || {
            this.sequences().is_superseded(&path, seq)
        })
        .await;
        CoalescerInner::finish(this, path, seq, result);
    }

    /// Settle upload `seq` of `path`.  Only the newest completion is
    /// reported; a failure with a newer upload already dispatched is dropped.
    fn finish(this: &Arc<Self>, path: PathBuf, seq: u64, result: SyncResult<()>) {
        let (latest, superseded) = {
            let mut sequences = this.sequences();
            let superseded = sequences.is_superseded(&path, seq);
            (sequences.complete(&path, seq), superseded)
        };

        if !latest {
            debug!(
                "Discarding stale upload result for {} (seq {})",
                path.display(),
                seq
            );
            // The stale write may have landed after the newer one.
            if result.is_ok() {
                CoalescerInner::schedule(this, path);
            }
            return;
        }

        match result {
            Ok(()) => this
                .notifier
                .info(&format!("File changed, uploaded: {}", path.display())),
            Err(e) if superseded => debug!(
                "Dropping upload error for {} (seq {}), newer upload pending: {}",
                path.display(),
                seq,
                e
            ),
            Err(e) => this.notifier.error(&format!("Failed to upload file: {e}")),
        }
    }
}
