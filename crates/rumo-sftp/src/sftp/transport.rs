// ── Transport seam ───────────────────────────────────────────────────────────

use crate::sftp::error::TransportError;
use crate::sftp::types::{EndpointConfig, RemoteEntry, SessionInfo};
use async_trait::async_trait;

pub type TransportResult<T> = Result<T, TransportError>;

/// One logical SFTP session.
///
/// The client serialises every call behind a single async mutex, so
/// implementations never see concurrent requests.
#[async_trait]
pub trait SftpTransport: Send + Sync {
    /// Open a session, replacing any session that is still open.
    async fn open(&mut self, config: &EndpointConfig) -> TransportResult<SessionInfo>;

    /// `mkdir -p`; an existing directory is success.
    async fn ensure_dir(&mut self, remote_dir: &str) -> TransportResult<()>;

    /// Write `contents` to `remote_path`, truncating.  Returns bytes written.
    async fn put(&mut self, remote_path: &str, contents: Vec<u8>) -> TransportResult<u64>;

    async fn remove(&mut self, remote_path: &str) -> TransportResult<()>;

    async fn list(&mut self, remote_dir: &str) -> TransportResult<Vec<RemoteEntry>>;

    /// Close the session.  Closing a closed transport is a no-op.
    async fn close(&mut self);
}
