use rumo_sftp::SyncError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Cannot prepare watched directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type WatchResult<T> = Result<T, WatchError>;
