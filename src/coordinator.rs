// ── SyncCoordinator – lifecycle of client, watch tree and config watch ───────

use crate::settings::SyncSettings;
use log::{debug, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use rumo_core::NotificationSink;
use rumo_sftp::{BulkUploadReport, RemoteSyncClient, SftpTransport, SyncError, SyncResult};
use rumo_watch::{raw_kind, DirectoryWatcher, WatchError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Watch on the endpoint config file.  Dropping it stops the reload task.
struct ConfigWatch {
    _backend: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Shared {
    settings: SyncSettings,
    client: Arc<RemoteSyncClient>,
    notifier: Arc<dyn NotificationSink>,
    watcher: Mutex<Option<Arc<DirectoryWatcher>>>,
    config_watch: Mutex<Option<ConfigWatch>>,
    // Serialises initialise / reload.
    lifecycle: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

impl SyncCoordinator {
    pub fn new(
        settings: SyncSettings,
        transport: Box<dyn SftpTransport>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let client = RemoteSyncClient::new(
            settings.config_path(),
            settings.watched_root(),
            transport,
            notifier.clone(),
        )
        .with_extensions(settings.extensions.clone());

        Self {
            shared: Arc::new(Shared {
                settings,
                client: Arc::new(client),
                notifier,
                watcher: Mutex::new(None),
                config_watch: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    pub fn client(&self) -> &Arc<RemoteSyncClient> {
        &self.shared.client
    }

    pub fn is_connected(&self) -> bool {
        self.shared.client.is_connected()
    }

    pub fn is_watching(&self) -> bool {
        self.shared.watcher().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.shared
            .watcher()
            .map(|w| w.watched_directories())
            .unwrap_or_default()
    }

    /// Load config, connect and, on success, start watching.  The config
    /// file is watched either way.  Returns whether the tree is watched.
    pub async fn initialize(&self) -> bool {
        let _guard = self.shared.lifecycle.lock().await;
        if self.is_disposed() {
            return false;
        }
        if self.shared.settings.watch_config {
            if let Err(e) = Shared::start_config_watch(&self.shared) {
                warn!("Config watch unavailable: {}", e);
                self.shared
                    .notifier
                    .warning(&format!("Cannot watch SFTP configuration: {e}"));
            }
        }
        self.shared.connect_and_watch().await
    }

    /// Reload the config, reconnect and rebuild the watch tree.  On failure
    /// the tree is left unwatched.
    pub async fn reload_config(&self) -> bool {
        self.shared.reload_config().await
    }

    /// The "upload all files now" command.
    pub async fn upload_all_files(&self) -> SyncResult<BulkUploadReport> {
        let shared = &self.shared;
        if !shared.client.is_connected() {
            shared.notifier.error(&SyncError::NotConnected.to_string());
            return Err(SyncError::NotConnected);
        }
        let report = shared.client.upload_all_files().await?;
        if report.is_success() {
            shared.notifier.info(&report.summary());
        } else {
            let first = report
                .failed
                .first()
                .map(|f| format!(": {} ({})", f.path, f.error))
                .unwrap_or_default();
            shared
                .notifier
                .error(&format!("{}{}", report.summary(), first));
        }
        Ok(report)
    }

    /// Feed an event to the directory watcher, for hosts without an OS
    /// watcher.  Ignored while nothing is watched.
    pub async fn handle_event(&self, event: Event) {
        let watcher = self.shared.watcher();
        if let Some(watcher) = watcher {
            watcher.handle_event(event).await;
        }
    }

    /// Tear down the watch tree, the config watch and the client, in that
    /// order.  Safe in any state and idempotent.
    pub async fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stop_watcher();
        let config_watch = self.shared.config_watch_slot().take();
        drop(config_watch);
        self.shared.client.dispose().await;
        info!("Sync coordinator disposed");
    }
}

impl Shared {
    fn watcher(&self) -> Option<Arc<DirectoryWatcher>> {
        self.watcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn watcher_slot(&self) -> MutexGuard<'_, Option<Arc<DirectoryWatcher>>> {
        self.watcher.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn config_watch_slot(&self) -> MutexGuard<'_, Option<ConfigWatch>> {
        self.config_watch.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn reload_config(&self) -> bool {
        let _guard = self.lifecycle.lock().await;
        if self.is_disposed() {
            return false;
        }
        info!(
            "SFTP configuration changed: {}",
            self.settings.config_path().display()
        );
        self.notifier.info("SFTP configuration changed, reconnecting");
        self.connect_and_watch().await
    }

    async fn connect_and_watch(&self) -> bool {
        if !self.client.load_config().await {
            self.stop_watcher();
            self.notifier.warning(&format!(
                "SFTP configuration missing or invalid: {}",
                self.settings.config_path().display()
            ));
            return false;
        }

        if let Err(e) = self.client.connect().await {
            self.stop_watcher();
            self.notifier
                .error(&format!("Failed to connect to SFTP server: {e}"));
            return false;
        }

        if self.is_disposed() {
            // dispose() ran while the handshake was in flight.
            self.client.dispose().await;
            return false;
        }

        match self.start_or_recreate_watcher() {
            Ok(()) => true,
            Err(e) => {
                self.notifier.error(&format!(
                    "Failed to watch {}: {e}",
                    self.settings.watched_root().display()
                ));
                false
            }
        }
    }

    fn start_or_recreate_watcher(&self) -> Result<(), WatchError> {
        let mut slot = self.watcher_slot();
        if self.is_disposed() {
            return Ok(());
        }
        if let Some(existing) = slot.as_ref() {
            existing.recreate()?;
            debug!("Watch tree recreated");
            return Ok(());
        }
        let watcher = DirectoryWatcher::start(self.settings.watch_settings(), self.client.clone())?;
        self.notifier.info(&format!(
            "Watching {}",
            self.settings.watched_root().display()
        ));
        *slot = Some(Arc::new(watcher));
        Ok(())
    }

    fn stop_watcher(&self) {
        let watcher = self.watcher_slot().take();
        if let Some(watcher) = watcher {
            watcher.close();
        }
    }

    fn start_config_watch(this: &Arc<Self>) -> Result<(), WatchError> {
        let config_path = this.settings.config_path();
        let Some(dir) = config_path.parent().map(|p| p.to_path_buf()) else {
            return Ok(());
        };
        let Some(file_name) = config_path.file_name().map(|n| n.to_os_string()) else {
            return Ok(());
        };
        std::fs::create_dir_all(&dir).map_err(|source| WatchError::Io {
            path: dir.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut backend = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if raw_kind(&event.kind).is_none() {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                let _ = tx.send(());
            }
        })?;
        backend.watch(&dir, RecursiveMode::NonRecursive)?;

        let settle = this.settings.config_settle;
        let weak: Weak<Shared> = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(settle).await;
                while rx.try_recv().is_ok() {}
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.reload_config().await;
            }
        });

        let mut slot = this.config_watch_slot();
        if this.is_disposed() {
            task.abort();
            return Ok(());
        }
        *slot = Some(ConfigWatch {
            _backend: backend,
            task,
        });
        debug!("Watching SFTP config {}", config_path.display());
        Ok(())
    }
}
