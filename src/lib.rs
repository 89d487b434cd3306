//! # rumo-sync
//!
//! Mirrors a local build-output directory onto an SFTP server as files
//! change.  The pieces:
//!   • [`rumo_sftp`] – endpoint config, the transport seam and the
//!     reconnecting [`RemoteSyncClient`]
//!   • [`rumo_watch`] – directory watching, change classification and the
//!     per-path debounce
//!   • [`coordinator`] – wires both together and follows the config file

pub mod coordinator;
pub mod error;
pub mod settings;

pub use coordinator::SyncCoordinator;
pub use error::{AppError, AppResult};
pub use settings::{SyncSettings, DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_SETTLE, DEFAULT_WATCHED_DIR};

pub use rumo_core::{
    LogNotifier, MemoryNotifier, Notification, NotificationLevel, NotificationSink,
};
pub use rumo_sftp::{
    BulkUploadReport, EndpointConfig, MemoryTransport, RemoteSyncClient, SftpTransport,
    Ssh2Transport, SyncError, SyncResult, TransportCall, TransportOp,
};
pub use rumo_watch::{DirectoryWatcher, WatchStrategy, DEFAULT_DEBOUNCE};
