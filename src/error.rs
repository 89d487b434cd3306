use rumo_sftp::SyncError;
use rumo_watch::WatchError;
use thiserror::Error;

/// Failures surfaced by the command-line front end.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("{0}")]
    Failed(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_keep_their_message() {
        let err: AppError = SyncError::NotConnected.into();
        assert_eq!(err.to_string(), "SFTP connection not established");
    }
}
