// ── DirectoryWatcher – recursive watch tree over the build output ────────────

use crate::watch::classify::{classify, raw_kind, ChangeClass, Existence, RawEventKind};
use crate::watch::coalescer::{ChangeCoalescer, DEFAULT_DEBOUNCE};
use crate::watch::error::{WatchError, WatchResult};
use crate::watch::recovery::{run_with_retry, SyncAction};
use log::{debug, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use rumo_core::NotificationSink;
use rumo_sftp::{RemoteSyncClient, TrackedExtensions};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// How directory handles are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchStrategy {
    /// Native recursion where the platform guarantees it, per-directory
    /// handles elsewhere.
    #[default]
    Auto,
    /// One non-recursive handle per directory.
    PerDirectory,
    /// A single recursive handle on the root (FSEvents, ReadDirectoryChangesW).
    NativeRecursive,
    /// No OS watcher; events arrive through [`DirectoryWatcher::handle_event`].
    Manual,
}

impl WatchStrategy {
    fn resolve(self) -> Self {
        match self {
            WatchStrategy::Auto if cfg!(any(target_os = "macos", target_os = "windows")) => {
                WatchStrategy::NativeRecursive
            }
            WatchStrategy::Auto => WatchStrategy::PerDirectory,
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub extensions: TrackedExtensions,
    pub debounce: Duration,
    pub strategy: WatchStrategy,
}

impl WatchSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: TrackedExtensions::default(),
            debounce: DEFAULT_DEBOUNCE,
            strategy: WatchStrategy::Auto,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_strategy(mut self, strategy: WatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_extensions(mut self, extensions: TrackedExtensions) -> Self {
        self.extensions = extensions;
        self
    }
}

type EventSender = mpsc::UnboundedSender<notify::Result<Event>>;
type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

#[derive(Default)]
struct WatchTree {
    backend: Option<RecommendedWatcher>,
    dirs: BTreeSet<PathBuf>,
}

struct WatcherInner {
    root: PathBuf,
    extensions: TrackedExtensions,
    strategy: WatchStrategy,
    client: Arc<RemoteSyncClient>,
    notifier: Arc<dyn NotificationSink>,
    coalescer: ChangeCoalescer,
    tree: Mutex<WatchTree>,
    events: EventSender,
}

pub struct DirectoryWatcher {
    inner: Arc<WatcherInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    /// Create the root if needed, register every directory below it and
    /// start the event loop.  Must be called inside a tokio runtime.
    pub fn start(settings: WatchSettings, client: Arc<RemoteSyncClient>) -> WatchResult<Self> {
        std::fs::create_dir_all(&settings.root).map_err(|source| WatchError::Io {
            path: settings.root.clone(),
            source,
        })?;

        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(WatcherInner {
            root: settings.root,
            extensions: settings.extensions,
            strategy: settings.strategy.resolve(),
            notifier: client.notifier(),
            coalescer: ChangeCoalescer::new(client.clone(), settings.debounce),
            client,
            tree: Mutex::new(WatchTree::default()),
            events,
        });
        inner.rebuild()?;

        let task = tokio::spawn(event_loop(inner.clone(), rx));
        Ok(Self {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn strategy(&self) -> WatchStrategy {
        self.inner.strategy
    }

    pub fn coalescer(&self) -> &ChangeCoalescer {
        &self.inner.coalescer
    }

    pub fn is_active(&self) -> bool {
        self.task.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Directories currently holding a handle (or tracked under native
    /// recursion), sorted.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.inner.tree().dirs.iter().cloned().collect()
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.inner.tree().dirs.contains(dir)
    }

    /// Close every handle and register the tree from scratch.
    pub fn recreate(&self) -> WatchResult<()> {
        self.inner.rebuild()
    }

    /// Bring the handle map in line with the directories on disk.
    pub fn rescan(&self) {
        self.inner.rescan();
    }

    /// Process one event as if the OS watcher had delivered it, then wait
    /// for the uploads and deletes it caused.
    pub async fn handle_event(&self, event: Event) {
        for transfer in self.inner.dispatch(event) {
            self.inner.run_transfer(transfer).await;
        }
    }

    /// Stop observing.  Scheduled uploads are dropped; running ones finish.
    pub fn close(&self) {
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            self.inner.coalescer.cancel_all();
            let mut tree = self.inner.tree();
            tree.backend = None;
            tree.dirs.clear();
            info!("Stopped watching {}", self.inner.root.display());
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remote work produced by an event, run outside the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Transfer {
    Upload(PathBuf),
    Delete(PathBuf),
}

async fn event_loop(inner: Arc<WatcherInner>, mut rx: EventReceiver) {
    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) => {
                for transfer in inner.dispatch(event) {
                    let inner = inner.clone();
                    tokio::spawn(async move { inner.run_transfer(transfer).await });
                }
            }
            Err(e) => warn!("File watcher error: {}", e),
        }
    }
}

impl WatcherInner {
    fn tree(&self) -> MutexGuard<'_, WatchTree> {
        self.tree.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn relative<'a>(&self, path: &'a Path) -> std::path::Display<'a> {
        path.strip_prefix(&self.root).unwrap_or(path).display()
    }

    // ── Handle map ───────────────────────────────────────────────────────────

    fn rebuild(&self) -> WatchResult<()> {
        let mut tree = self.tree();
        // Dropping the backend releases every handle it holds.
        tree.backend = None;
        tree.dirs.clear();

        if self.strategy != WatchStrategy::Manual {
            let tx = self.events.clone();
            let mut backend = notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            })?;
            if self.strategy == WatchStrategy::NativeRecursive {
                backend.watch(&self.root, RecursiveMode::Recursive)?;
            }
            tree.backend = Some(backend);
        }

        let added = self.register_subtree(&mut tree, &self.root).len();
        info!(
            "Watching {} ({} directories, {:?})",
            self.root.display(),
            added,
            self.strategy
        );
        Ok(())
    }

    fn rescan(&self) {
        let mut tree = self.tree();
        let vanished: Vec<PathBuf> = tree.dirs.iter().filter(|d| !d.is_dir()).cloned().collect();
        let mut removed = 0;
        for dir in vanished {
            removed += self.unregister_subtree(&mut tree, &dir);
        }
        let added = self.register_subtree(&mut tree, &self.root).len();
        if added > 0 || removed > 0 {
            debug!("Rescan: +{} / -{} watched directories", added, removed);
        }
    }

    /// Register `dir` and every directory below it; returns the newly added.
    fn register_subtree(&self, tree: &mut WatchTree, dir: &Path) -> Vec<PathBuf> {
        let mut added = Vec::new();
        let dirs = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir());
        for entry in dirs {
            let path = entry.into_path();
            if tree.dirs.contains(&path) {
                continue;
            }
            if self.strategy == WatchStrategy::PerDirectory {
                if let Some(backend) = tree.backend.as_mut() {
                    if let Err(e) = backend.watch(&path, RecursiveMode::NonRecursive) {
                        warn!("Cannot watch {}: {}", path.display(), e);
                        continue;
                    }
                }
            }
            tree.dirs.insert(path.clone());
            added.push(path);
        }
        added
    }

    /// Tracked files directly inside each of `dirs`.
    fn tracked_files(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        dirs.iter()
            .flat_map(|dir| {
                WalkDir::new(dir)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(Result::ok)
            })
            .filter(|e| e.file_type().is_file() && self.extensions.matches(e.path()))
            .map(|e| e.into_path())
            .collect()
    }

    fn unregister_subtree(&self, tree: &mut WatchTree, dir: &Path) -> usize {
        let gone: Vec<PathBuf> = tree
            .dirs
            .iter()
            .filter(|d| d.starts_with(dir))
            .cloned()
            .collect();
        for path in &gone {
            tree.dirs.remove(path);
            if self.strategy == WatchStrategy::PerDirectory {
                if let Some(backend) = tree.backend.as_mut() {
                    // The kernel usually dropped the handle with the directory.
                    let _ = backend.unwatch(path);
                }
            }
        }
        gone.len()
    }

    // ── Event handling ───────────────────────────────────────────────────────

    /// Classify an event and update the handle map.  Never touches the
    /// transport; uploads and deletes are returned for the caller to run.
    fn dispatch(&self, event: Event) -> Vec<Transfer> {
        let Some(raw) = raw_kind(&event.kind) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut transfers = Vec::new();
        for path in event.paths {
            if seen.insert(path.clone()) {
                self.dispatch_path(raw, path, &mut transfers);
            }
        }
        transfers
    }

    fn dispatch_path(&self, raw: RawEventKind, path: PathBuf, transfers: &mut Vec<Transfer>) {
        if !path.starts_with(&self.root) {
            return;
        }
        let existence = Existence::of(&path);
        let known_directory = self.tree().dirs.contains(&path);

        match classify(raw, &path, existence, known_directory, &self.extensions) {
            ChangeClass::DirectoryCreated => {
                let added = {
                    let mut tree = self.tree();
                    self.register_subtree(&mut tree, &path)
                };
                if added.is_empty() {
                    return;
                }
                self.notifier
                    .info(&format!("Directory created: {}", self.relative(&path)));
                // Files written before the handles existed produced no event.
                for file in self.tracked_files(&added) {
                    self.notifier
                        .info(&format!("File created: {}", self.relative(&file)));
                    transfers.push(Transfer::Upload(file));
                }
            }
            ChangeClass::DirectoryRemoved => {
                let removed = {
                    let mut tree = self.tree();
                    self.unregister_subtree(&mut tree, &path)
                };
                self.notifier.info(&format!(
                    "Directory removed: {} ({} watch handle(s) closed)",
                    self.relative(&path),
                    removed
                ));
            }
            ChangeClass::FileChanged => {
                debug!("File changed: {}", path.display());
                self.coalescer.notify_change(path);
            }
            ChangeClass::FileCreated => {
                self.notifier
                    .info(&format!("File created: {}", self.relative(&path)));
                self.rescan();
                transfers.push(Transfer::Upload(path));
            }
            ChangeClass::FileDeleted => {
                self.notifier
                    .info(&format!("File deleted: {}", self.relative(&path)));
                transfers.push(Transfer::Delete(path));
            }
            ChangeClass::Ignored => {}
        }
    }

    async fn run_transfer(&self, transfer: Transfer) {
        match transfer {
            Transfer::Upload(path) => {
                match run_with_retry(&self.client, SyncAction::Upload, &path, || false).await {
                    Ok(()) => self
                        .notifier
                        .info(&format!("Uploaded: {}", self.relative(&path))),
                    Err(e) => self.notifier.error(&format!("Failed to upload file: {e}")),
                }
            }
            Transfer::Delete(path) => {
                match run_with_retry(&self.client, SyncAction::Delete, &path, || false).await {
                    Ok(()) => self
                        .notifier
                        .info(&format!("Deleted remote file: {}", self.relative(&path))),
                    Err(e) => self.notifier.error(&format!("Failed to delete file: {e}")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, EventKind, ModifyKind, RemoveKind, RenameMode};
    use rumo_core::{MemoryNotifier, NotificationLevel};
    use rumo_sftp::{EndpointConfig, MemoryTransport, TransportCall, TransportOp};

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        remote: MemoryTransport,
        notes: Arc<MemoryNotifier>,
        watcher: DirectoryWatcher,
    }

    async fn harness(prepare: impl FnOnce(&Path)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("build").join("type");
        prepare(&root);

        let remote = MemoryTransport::new();
        let notes = Arc::new(MemoryNotifier::new());
        let client = Arc::new(RemoteSyncClient::new(
            dir.path().join("sftp.json"),
            root.clone(),
            Box::new(remote.clone()),
            notes.clone(),
        ));
        client.set_config(Some(EndpointConfig::new("h", 22, "u", "p", "/r")));
        client.connect().await.unwrap();
        remote.clear_calls();
        notes.take();

        let settings = WatchSettings::new(root.clone()).with_strategy(WatchStrategy::Manual);
        let watcher = DirectoryWatcher::start(settings, client).unwrap();
        Harness {
            _dir: dir,
            root,
            remote,
            notes,
            watcher,
        }
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    fn created(path: &Path) -> Event {
        event(EventKind::Create(CreateKind::Any), path)
    }

    async fn settle(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn start_creates_root_and_registers_existing_tree() {
        let h = harness(|root| {
            std::fs::create_dir_all(root.join("a/b")).unwrap();
            std::fs::create_dir_all(root.join("c")).unwrap();
        })
        .await;

        let dirs = h.watcher.watched_directories();
        assert_eq!(dirs.len(), 4);
        for rel in ["", "a", "a/b", "c"] {
            assert!(h.watcher.is_watching(&h.root.join(rel)), "{rel}");
        }
    }

    #[tokio::test]
    async fn created_directory_registers_its_subtree() {
        let h = harness(|_| {}).await;
        std::fs::create_dir_all(h.root.join("x/y/z")).unwrap();

        h.watcher.handle_event(created(&h.root.join("x"))).await;

        assert!(h.watcher.is_watching(&h.root.join("x/y/z")));
        assert_eq!(h.watcher.watched_directories().len(), 4);
        assert!(h.remote.calls().is_empty());
        assert_eq!(h.notes.messages(NotificationLevel::Info), vec!["Directory created: x"]);
    }

    #[tokio::test]
    async fn removed_directory_drops_descendant_handles() {
        let h = harness(|root| std::fs::create_dir_all(root.join("a/b")).unwrap()).await;
        std::fs::remove_dir_all(h.root.join("a")).unwrap();

        h.watcher
            .handle_event(event(EventKind::Remove(RemoveKind::Folder), &h.root.join("a")))
            .await;

        assert_eq!(h.watcher.watched_directories(), vec![h.root.clone()]);
    }

    #[tokio::test]
    async fn created_file_is_uploaded_immediately_and_tree_rescanned() {
        let h = harness(|_| {}).await;
        std::fs::create_dir_all(h.root.join("lib")).unwrap();
        std::fs::write(h.root.join("lib/app.js"), "1").unwrap();

        h.watcher.handle_event(created(&h.root.join("lib/app.js"))).await;

        assert_eq!(h.remote.puts(), vec!["/r/lib/app.js"]);
        assert!(h.watcher.is_watching(&h.root.join("lib")));
        assert_eq!(h.watcher.coalescer().pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_on_name_change_deletes_remote() {
        let h = harness(|_| {}).await;
        h.remote.insert_file("/r/old.js.map", b"x");

        h.watcher
            .handle_event(event(
                EventKind::Remove(RemoveKind::File),
                &h.root.join("old.js.map"),
            ))
            .await;

        assert!(h.remote.file("/r/old.js.map").is_none());
        assert!(h
            .notes
            .messages(NotificationLevel::Info)
            .contains(&"Deleted remote file: old.js.map".to_string()));
    }

    #[tokio::test]
    async fn untracked_and_outside_paths_are_ignored() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("style.css"), "x").unwrap();
        })
        .await;

        h.watcher.handle_event(created(&h.root.join("style.css"))).await;
        h.watcher
            .handle_event(created(Path::new("/somewhere/else.js")))
            .await;
        h.watcher
            .handle_event(event(
                EventKind::Access(notify::event::AccessKind::Any),
                &h.root.join("a.js"),
            ))
            .await;

        assert!(h.remote.calls().is_empty());
        assert!(h.notes.entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn content_changes_are_debounced() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("a.js"), "v0").unwrap();
        })
        .await;
        let file = h.root.join("a.js");

        for i in 1..=3 {
            std::fs::write(&file, format!("v{i}")).unwrap();
            h.watcher
                .handle_event(event(
                    EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                    &file,
                ))
                .await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(h.watcher.coalescer().is_pending(&file));
        assert!(h.remote.puts().is_empty());

        settle(|| !h.remote.puts().is_empty()).await;
        assert_eq!(h.remote.puts(), vec!["/r/a.js"]);
        assert_eq!(h.remote.file("/r/a.js").unwrap(), b"v3");
    }

    #[tokio::test]
    async fn failed_create_upload_reports_one_error() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("a.js"), "x").unwrap();
        })
        .await;
        h.remote.fail_next(TransportOp::Put, "connection lost");
        h.remote.fail_next(TransportOp::Put, "connection lost");

        h.watcher.handle_event(created(&h.root.join("a.js"))).await;

        assert_eq!(h.remote.opens(), 1, "one reconnect after the initial connect");
        let errors = h.notes.messages(NotificationLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Failed to upload file:"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_scheduled_uploads() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("a.js"), "x").unwrap();
        })
        .await;
        let file = h.root.join("a.js");
        h.watcher
            .handle_event(event(EventKind::Modify(ModifyKind::Any), &file))
            .await;
        assert_eq!(h.watcher.coalescer().pending_count(), 1);

        h.watcher.close();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.watcher.coalescer().pending_count(), 0);
        assert!(h.remote.puts().is_empty());
        assert!(h.watcher.watched_directories().is_empty());
        assert!(!h.watcher.is_active());
    }

    #[tokio::test]
    async fn rename_is_one_delete_and_one_upload() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("new.js"), "x").unwrap();
        })
        .await;
        h.remote.insert_file("/r/old.js", b"x");
        let old = h.root.join("old.js");
        let new = h.root.join("new.js");

        h.watcher
            .handle_event(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &old))
            .await;
        h.watcher
            .handle_event(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &new))
            .await;
        h.watcher
            .handle_event(
                Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                    .add_path(old.clone())
                    .add_path(new.clone()),
            )
            .await;

        assert_eq!(h.remote.count(|c| matches!(c, TransportCall::Remove(_))), 1);
        assert_eq!(h.remote.puts(), vec!["/r/new.js"]);
        assert_eq!(h.remote.opens(), 0);
        assert!(h.notes.messages(NotificationLevel::Error).is_empty());
        assert!(h.remote.file("/r/old.js").is_none());
    }

    #[tokio::test]
    async fn repeated_path_in_one_event_is_handled_once() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("a.js"), "x").unwrap();
        })
        .await;
        let file = h.root.join("a.js");

        h.watcher
            .handle_event(
                Event::new(EventKind::Create(CreateKind::File))
                    .add_path(file.clone())
                    .add_path(file.clone()),
            )
            .await;

        assert_eq!(h.remote.puts(), vec!["/r/a.js"]);
    }

    #[tokio::test]
    async fn new_directory_uploads_tracked_files_already_inside() {
        let h = harness(|root| std::fs::create_dir_all(root).unwrap()).await;
        std::fs::create_dir_all(h.root.join("sub/deep")).unwrap();
        std::fs::write(h.root.join("sub/inner.js"), "1").unwrap();
        std::fs::write(h.root.join("sub/skip.css"), "2").unwrap();
        std::fs::write(h.root.join("sub/deep/x.js.map"), "3").unwrap();

        h.watcher.handle_event(created(&h.root.join("sub"))).await;

        let mut puts = h.remote.puts();
        puts.sort();
        assert_eq!(puts, vec!["/r/sub/deep/x.js.map", "/r/sub/inner.js"]);
        assert!(h.watcher.is_watching(&h.root.join("sub/deep")));
        assert!(h
            .notes
            .messages(NotificationLevel::Info)
            .contains(&"File created: sub/inner.js".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transfer_does_not_hold_up_registration() {
        let h = harness(|root| {
            std::fs::create_dir_all(root).unwrap();
            std::fs::write(root.join("a.js"), "x").unwrap();
        })
        .await;
        h.remote.delay_next_put(Duration::from_secs(5));
        h.watcher
            .inner
            .events
            .send(Ok(created(&h.root.join("a.js"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        std::fs::create_dir_all(h.root.join("sub")).unwrap();
        std::fs::write(h.root.join("sub/inner.js"), "y").unwrap();
        h.watcher
            .inner
            .events
            .send(Ok(created(&h.root.join("sub"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.watcher.is_watching(&h.root.join("sub")));
        assert!(h.remote.puts().is_empty(), "first upload still in flight");

        settle(|| h.remote.puts().len() == 2).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        let mut puts = h.remote.puts();
        puts.sort();
        assert_eq!(puts, vec!["/r/a.js", "/r/sub/inner.js"]);
    }
}
