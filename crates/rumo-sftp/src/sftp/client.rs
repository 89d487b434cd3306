// ── RemoteSyncClient – the single logical SFTP connection ────────────────────

use crate::sftp::config;
use crate::sftp::error::{SyncError, SyncResult, TransportError};
use crate::sftp::paths::{remote_parent, PathMapper, TrackedExtensions};
use crate::sftp::transport::SftpTransport;
use crate::sftp::types::*;
use chrono::Utc;
use log::{debug, info, warn};
use rumo_core::NotificationSink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Which step of an operation the transport failed in.
#[derive(Debug, Clone, Copy)]
enum Step {
    EnsureDir,
    Put,
    Remove,
    List,
}

impl Step {
    fn verb(self) -> &'static str {
        match self {
            Step::EnsureDir => "create directory",
            Step::Put => "upload",
            Step::Remove => "delete",
            Step::List => "list",
        }
    }
}

struct StepFailure {
    step: Step,
    path: String,
    error: TransportError,
}

impl StepFailure {
    fn new(step: Step, path: &str, error: TransportError) -> Self {
        Self {
            step,
            path: path.to_string(),
            error,
        }
    }
}

pub struct RemoteSyncClient {
    config_path: PathBuf,
    local_root: PathBuf,
    extensions: TrackedExtensions,
    config: RwLock<Option<EndpointConfig>>,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<SessionInfo>>,
    transport: Mutex<Box<dyn SftpTransport>>,
    notifier: Arc<dyn NotificationSink>,
}

impl RemoteSyncClient {
    pub fn new(
        config_path: impl Into<PathBuf>,
        local_root: impl Into<PathBuf>,
        transport: Box<dyn SftpTransport>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            local_root: local_root.into(),
            extensions: TrackedExtensions::default(),
            config: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            session: RwLock::new(None),
            transport: Mutex::new(transport),
            notifier,
        }
    }

    pub fn with_extensions(mut self, extensions: TrackedExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn extensions(&self) -> &TrackedExtensions {
        &self.extensions
    }

    pub fn notifier(&self) -> Arc<dyn NotificationSink> {
        self.notifier.clone()
    }

    pub fn config(&self) -> Option<EndpointConfig> {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn has_config(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn mapper(&self) -> Option<PathMapper> {
        self.config()
            .map(|c| PathMapper::new(self.local_root.clone(), &c.remote_path))
    }

    fn mark_disconnected(&self) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = ConnectionState::Disconnected;
        *self.session.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    // ── Configuration ────────────────────────────────────────────────────────

    /// Re-read the config file.  Returns whether a usable config is present.
    ///
    /// An absent config closes any open session: without an endpoint the
    /// client is never connected.
    pub async fn load_config(&self) -> bool {
        let loaded = config::load_config(&self.config_path);
        let present = loaded.is_some();
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = loaded;
        if !present {
            self.transport.lock().await.close().await;
            self.mark_disconnected();
            debug!("SFTP config absent at {}", self.config_path.display());
        }
        present
    }

    /// Replace the config snapshot directly, for hosts that do not keep a
    /// config file.
    pub fn set_config(&self, config: Option<EndpointConfig>) {
        let config = config.filter(|c| c.missing_field().is_none());
        if config.is_none() {
            self.mark_disconnected();
        }
        *self.config.write().unwrap_or_else(|p| p.into_inner()) = config;
    }

    // ── Connection lifecycle ─────────────────────────────────────────────────

    /// Open a fresh session with the current config, closing any open one.
    pub async fn connect(&self) -> SyncResult<SessionInfo> {
        let Some(config) = self.config() else {
            self.mark_disconnected();
            return Err(SyncError::ConfigMissing);
        };

        let mut transport = self.transport.lock().await;
        transport.close().await;
        self.mark_disconnected();

        match transport.open(&config).await {
            Ok(info) => {
                *self.session.write().unwrap_or_else(|p| p.into_inner()) = Some(info.clone());
                *self.state.write().unwrap_or_else(|p| p.into_inner()) = ConnectionState::Connected;
                info!(
                    "SFTP connected to {} as {} ({})",
                    config.address(),
                    config.username,
                    info.auth_method
                );
                self.notifier
                    .info(&format!("Connected to SFTP server {}", config.address()));
                Ok(info)
            }
            Err(e) => {
                warn!("SFTP connect to {} failed: {}", config.address(), e);
                Err(SyncError::Connection(e.message))
            }
        }
    }

    /// Best-effort [`connect`](Self::connect); failures become a notification.
    pub async fn reconnect(&self) -> bool {
        self.notifier.info("Reconnecting to SFTP server...");
        match self.connect().await {
            Ok(_) => true,
            Err(e) => {
                self.notifier.warning(&format!("Reconnect failed: {e}"));
                false
            }
        }
    }

    /// Close the session.  Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.transport.lock().await.close().await;
        if self.is_connected() {
            info!("SFTP client disposed");
        }
        self.mark_disconnected();
    }

    // ── Failure classification ───────────────────────────────────────────────

    async fn fail(&self, failure: StepFailure, recovery: Recovery) -> SyncError {
        let StepFailure { step, path, error } = failure;
        if !error.is_connection_loss() {
            return match step {
                Step::EnsureDir => SyncError::RemoteDirectory {
                    path,
                    message: error.message,
                },
                Step::Put => SyncError::Upload {
                    path,
                    message: error.message,
                },
                Step::Remove => SyncError::Delete {
                    path,
                    message: error.message,
                },
                Step::List => SyncError::List {
                    path,
                    message: error.message,
                },
            };
        }

        self.mark_disconnected();
        warn!(
            "SFTP connection lost during {} of {}: {}",
            step.verb(),
            path,
            error
        );
        if recovery == Recovery::Reconnect {
            self.reconnect().await;
        }
        SyncError::TransientDisconnect {
            operation: step.verb(),
            path,
            message: error.message,
        }
    }

    // ── Upload ───────────────────────────────────────────────────────────────

    pub async fn upload_file(&self, local: &Path) -> SyncResult<()> {
        self.upload(local, Recovery::Reconnect).await
    }

    /// Mirror one local file.  No-op without a config.
    pub async fn upload(&self, local: &Path, recovery: Recovery) -> SyncResult<()> {
        let Some(mapper) = self.mapper() else {
            debug!("Skipping upload of {}: no SFTP config", local.display());
            return Ok(());
        };
        let remote = mapper.remote_path(local)?;

        let contents = tokio::fs::read(local).await.map_err(|e| SyncError::Upload {
            path: local.display().to_string(),
            message: e.to_string(),
        })?;

        let result = {
            let mut transport = self.transport.lock().await;
            put_with_parents(&mut **transport, &remote, contents).await
        };

        match result {
            Ok(bytes) => {
                info!("SFTP upload: {} -> {} ({} bytes)", local.display(), remote, bytes);
                Ok(())
            }
            Err(failure) => Err(self.fail(failure, recovery).await),
        }
    }

    // ── Delete ───────────────────────────────────────────────────────────────

    pub async fn delete_file(&self, local: &Path) -> SyncResult<()> {
        self.delete(local, Recovery::Reconnect).await
    }

    pub async fn delete(&self, local: &Path, recovery: Recovery) -> SyncResult<()> {
        let Some(mapper) = self.mapper() else {
            debug!("Skipping delete of {}: no SFTP config", local.display());
            return Ok(());
        };
        let remote = mapper.remote_path(local)?;

        let result = {
            let mut transport = self.transport.lock().await;
            transport
                .remove(&remote)
                .await
                .map_err(|e| StepFailure::new(Step::Remove, &remote, e))
        };

        match result {
            Ok(()) => {
                info!("SFTP delete: {}", remote);
                Ok(())
            }
            Err(failure) => Err(self.fail(failure, recovery).await),
        }
    }

    // ── Bulk upload ──────────────────────────────────────────────────────────

    /// Upload every tracked file below the local root.  One failing file does
    /// not stop the others.
    pub async fn upload_all_files(&self) -> SyncResult<BulkUploadReport> {
        let started_at = Utc::now();
        let mut report = BulkUploadReport {
            uploaded: 0,
            failed: Vec::new(),
            started_at,
            finished_at: started_at,
        };
        if !self.has_config() {
            debug!("Skipping bulk upload: no SFTP config");
            return Ok(report);
        }

        let mut files = self.collect_local_files(&mut report).into_iter();
        while let Some(local) = files.next() {
            match self.upload(&local, Recovery::Reconnect).await {
                Ok(()) => report.uploaded += 1,
                Err(e) => {
                    warn!("Bulk upload of {} failed: {}", local.display(), e);
                    let session_gone = e.is_transient() && !self.is_connected();
                    report.failed.push(FailedUpload {
                        path: local.display().to_string(),
                        error: e.to_string(),
                    });
                    if session_gone {
                        // Reconnect failed; every remaining file would retry it.
                        let skipped = SyncError::NotConnected.to_string();
                        report.failed.extend(files.by_ref().map(|rest| FailedUpload {
                            path: rest.display().to_string(),
                            error: skipped.clone(),
                        }));
                        warn!("Bulk upload aborted: SFTP session could not be restored");
                        break;
                    }
                }
            }
        }

        report.finished_at = Utc::now();
        info!("SFTP bulk upload: {}", report.summary());
        Ok(report)
    }

    fn collect_local_files(&self, report: &mut BulkUploadReport) -> Vec<PathBuf> {
        if !self.local_root.is_dir() {
            return Vec::new();
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.local_root)
            .follow_links(false)
            .sort_by_file_name()
        {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.extensions.matches(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| self.local_root.display().to_string());
                    report.failed.push(FailedUpload {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        files
    }

    // ── Remote listing ───────────────────────────────────────────────────────

    /// List a directory given relative to the remote root.
    pub async fn list_remote(&self, relative_dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let mapper = self.mapper().ok_or(SyncError::ConfigMissing)?;
        let remote = mapper.remote_dir(relative_dir);

        let result = {
            let mut transport = self.transport.lock().await;
            transport
                .list(&remote)
                .await
                .map_err(|e| StepFailure::new(Step::List, &remote, e))
        };
        match result {
            Ok(entries) => Ok(entries),
            Err(failure) => Err(self.fail(failure, Recovery::Reconnect).await),
        }
    }
}

async fn put_with_parents(
    transport: &mut dyn SftpTransport,
    remote: &str,
    contents: Vec<u8>,
) -> Result<u64, StepFailure> {
    if let Some(parent) = remote_parent(remote) {
        transport
            .ensure_dir(&parent)
            .await
            .map_err(|e| StepFailure::new(Step::EnsureDir, &parent, e))?;
    }
    transport
        .put(remote, contents)
        .await
        .map_err(|e| StepFailure::new(Step::Put, remote, e))
}
