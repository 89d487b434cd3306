//! Typed errors for the sync client.
//!
//! Callers match on [`SyncError`] to decide between "reconnect and retry
//! once" and "report and give up"; [`SyncError::is_transient`] is the single
//! place that decision is made.

use std::path::PathBuf;
use thiserror::Error;

/// Raw failure reported by a transport, carrying the wire-level message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the message indicates the session is gone rather than a
    /// problem with this particular path.
    pub fn is_connection_loss(&self) -> bool {
        is_connection_loss_heuristic(&self.message)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => {
                Self::new(format!("connection lost: {e}"))
            }
            _ => Self::new(e.to_string()),
        }
    }
}

/// Message fragments that mean the SFTP channel is no longer usable.
///
/// "no such file" is included because a server that dropped the channel
/// reports later requests against it as missing handles.
const CONNECTION_LOSS_PATTERNS: &[&str] = &[
    "no such file",
    "connection lost",
    "broken pipe",
    "connection reset",
    "not connected",
    "socket disconnect",
    "unexpected eof",
];

fn is_connection_loss_heuristic(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONNECTION_LOSS_PATTERNS.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable endpoint configuration; sync operations are no-ops.
    #[error("SFTP configuration is missing or invalid")]
    ConfigMissing,

    #[error("SFTP connection not established")]
    NotConnected,

    /// Handshake, authentication or session setup failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The session dropped in the middle of an operation.
    #[error("Connection lost while trying to {operation} {path}: {message}")]
    TransientDisconnect {
        operation: &'static str,
        path: String,
        message: String,
    },

    #[error("Failed to create remote directory {path}: {message}")]
    RemoteDirectory { path: String, message: String },

    #[error("Failed to upload {path}: {message}")]
    Upload { path: String, message: String },

    #[error("Failed to delete {path}: {message}")]
    Delete { path: String, message: String },

    #[error("Failed to list {path}: {message}")]
    List { path: String, message: String },

    #[error("{} is not inside the watched root", .0.display())]
    OutsideRoot(PathBuf),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// `true` when reconnecting and retrying the operation once is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientDisconnect { .. })
    }
}
