// ── Reconnect-and-retry-once ─────────────────────────────────────────────────

use log::{debug, warn};
use rumo_sftp::{Recovery, RemoteSyncClient, SyncResult};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Upload,
    Delete,
}

impl SyncAction {
    pub fn verb(self) -> &'static str {
        match self {
            SyncAction::Upload => "upload",
            SyncAction::Delete => "delete",
        }
    }
}

async fn perform(
    client: &RemoteSyncClient,
    action: SyncAction,
    path: &Path,
    recovery: Recovery,
) -> SyncResult<()> {
    match action {
        SyncAction::Upload => client.upload(path, recovery).await,
        SyncAction::Delete => client.delete(path, recovery).await,
    }
}

/// Run `action` for `path`.  A connection-loss failure triggers the client's
/// reconnect, then exactly one more attempt that does not reconnect again.
///
/// `superseded` is polled before the retry; when it returns `true` the retry
/// is skipped and the first error is returned.
pub async fn run_with_retry<F>(
    client: &RemoteSyncClient,
    action: SyncAction,
    path: &Path,
    superseded: F,
) -> SyncResult<()>
where
    F: Fn() -> bool + Send + Sync,
{
    match perform(client, action, path, Recovery::Reconnect).await {
        Err(e) if e.is_transient() => {
            if superseded() {
                debug!(
                    "Skipping {} retry for {}: a newer change is in flight",
                    action.verb(),
                    path.display()
                );
                return Err(e);
            }
            warn!(
                "{} of {} failed ({}), retrying once",
                action.verb(),
                path.display(),
                e
            );
            perform(client, action, path, Recovery::None).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumo_core::{MemoryNotifier, NotificationLevel};
    use rumo_sftp::{EndpointConfig, MemoryTransport, TransportOp};
    use std::sync::Arc;

    async fn connected(dir: &Path) -> (MemoryTransport, Arc<MemoryNotifier>, RemoteSyncClient) {
        let remote = MemoryTransport::new();
        let notes = Arc::new(MemoryNotifier::new());
        let client = RemoteSyncClient::new(
            dir.join("sftp.json"),
            dir.to_path_buf(),
            Box::new(remote.clone()),
            notes.clone(),
        );
        client.set_config(Some(EndpointConfig::new("h", 22, "u", "p", "/r")));
        client.connect().await.unwrap();
        (remote, notes, client)
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "x").unwrap();
        let (remote, notes, client) = connected(dir.path()).await;

        remote.fail_next(TransportOp::Put, "connection lost");
        run_with_retry(&client, SyncAction::Upload, &dir.path().join("a.js"), || false)
            .await
            .unwrap();

        assert_eq!(remote.opens(), 2);
        assert_eq!(remote.puts().len(), 2);
        assert_eq!(notes.count(NotificationLevel::Error), 0);
    }

    #[tokio::test]
    async fn second_transient_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "x").unwrap();
        let (remote, _notes, client) = connected(dir.path()).await;

        remote.fail_next(TransportOp::Put, "connection lost");
        remote.fail_next(TransportOp::Put, "connection lost");
        let err = run_with_retry(&client, SyncAction::Upload, &dir.path().join("a.js"), || false)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(remote.opens(), 2, "exactly one reconnect");
        assert_eq!(remote.puts().len(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "x").unwrap();
        let (remote, _notes, client) = connected(dir.path()).await;

        remote.fail_next(TransportOp::Put, "Permission denied");
        assert!(
            run_with_retry(&client, SyncAction::Upload, &dir.path().join("a.js"), || false)
                .await
                .is_err()
        );
        assert_eq!(remote.opens(), 1);
        assert_eq!(remote.puts().len(), 1);
    }

    #[tokio::test]
    async fn superseded_upload_skips_retry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "x").unwrap();
        let (remote, _notes, client) = connected(dir.path()).await;

        remote.fail_next(TransportOp::Put, "connection lost");
        assert!(
            run_with_retry(&client, SyncAction::Upload, &dir.path().join("a.js"), || true)
                .await
                .is_err()
        );
        assert_eq!(remote.puts().len(), 1);
    }

    #[tokio::test]
    async fn delete_retries_after_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (remote, _notes, client) = connected(dir.path()).await;
        remote.insert_file("/r/gone.js", b"x");

        remote.fail_next(TransportOp::Remove, "socket disconnect");
        run_with_retry(&client, SyncAction::Delete, &dir.path().join("gone.js"), || false)
            .await
            .unwrap();
        assert!(remote.file("/r/gone.js").is_none());
    }
}
