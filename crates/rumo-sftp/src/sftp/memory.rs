// ── In-memory transport ──────────────────────────────────────────────────────
//
// A remote tree held in a map, used by `--dry-run` and as the test double for
// the client, watcher and coordinator.  Clones share state, so a test keeps
// one handle for assertions and gives another to the client.

use crate::sftp::error::TransportError;
use crate::sftp::paths::remote_parent;
use crate::sftp::transport::{SftpTransport, TransportResult};
use crate::sftp::types::{EndpointConfig, RemoteEntry, SessionInfo};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Operation kinds that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Open,
    EnsureDir,
    Put,
    Remove,
    List,
}

/// Every call the transport received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Open { host: String },
    EnsureDir(String),
    Put { remote: String, bytes: usize },
    Remove(String),
    List(String),
    Close,
}

#[derive(Default)]
struct MemoryState {
    connected: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    calls: Vec<TransportCall>,
    failures: VecDeque<(TransportOp, String)>,
    put_delays: VecDeque<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the next `op` call fail with `message`.  Queued failures are
    /// consumed in order by the first matching call.
    pub fn fail_next(&self, op: TransportOp, message: impl Into<String>) {
        self.lock().failures.push_back((op, message.into()));
    }

    /// Delay the next `put` by `delay` before it is recorded, fails or stores.
    pub fn delay_next_put(&self, delay: Duration) {
        self.lock().put_delays.push_back(delay);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(*c)).count()
    }

    pub fn puts(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Put { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Open { .. }))
    }

    pub fn file(&self, remote: &str) -> Option<Vec<u8>> {
        self.lock().files.get(remote).cloned()
    }

    pub fn has_dir(&self, remote: &str) -> bool {
        self.lock().dirs.contains(remote)
    }

    pub fn is_open(&self) -> bool {
        self.lock().connected
    }

    /// Seed a remote file without recording a call.
    pub fn insert_file(&self, remote: &str, contents: &[u8]) {
        let mut state = self.lock();
        if let Some(parent) = remote_parent(remote) {
            insert_ancestors(&mut state.dirs, &parent);
        }
        state.files.insert(remote.to_string(), contents.to_vec());
    }

    /// Simulate the server dropping the session.
    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }

    fn begin(&self, op: TransportOp, call: TransportCall) -> TransportResult<()> {
        let mut state = self.lock();
        state.calls.push(call);
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, message)) = state.failures.remove(pos) {
                return Err(TransportError::new(message));
            }
        }
        if op != TransportOp::Open && !state.connected {
            return Err(TransportError::new("not connected"));
        }
        Ok(())
    }
}

fn insert_ancestors(dirs: &mut BTreeSet<String>, dir: &str) {
    let mut current = dir.to_string();
    loop {
        if !dirs.insert(current.clone()) {
            break;
        }
        match remote_parent(&current) {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }
}

#[async_trait]
impl SftpTransport for MemoryTransport {
    async fn open(&mut self, config: &EndpointConfig) -> TransportResult<SessionInfo> {
        self.begin(
            TransportOp::Open,
            TransportCall::Open {
                host: config.host.clone(),
            },
        )?;
        let mut state = self.lock();
        state.connected = true;
        state.dirs.insert("/".to_string());
        info!("Memory transport opened for {}", config.address());
        Ok(SessionInfo {
            id: Uuid::new_v4().to_string(),
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            auth_method: "memory".to_string(),
            server_banner: Some("SSH-2.0-rumo-memory".to_string()),
            host_key_fingerprint: None,
            connected_at: Utc::now(),
        })
    }

    async fn ensure_dir(&mut self, remote_dir: &str) -> TransportResult<()> {
        self.begin(
            TransportOp::EnsureDir,
            TransportCall::EnsureDir(remote_dir.to_string()),
        )?;
        let mut state = self.lock();
        if state.files.contains_key(remote_dir) {
            return Err(TransportError::new(format!(
                "mkdir '{remote_dir}' failed: a file with that name exists"
            )));
        }
        insert_ancestors(&mut state.dirs, remote_dir);
        Ok(())
    }

    async fn put(&mut self, remote_path: &str, contents: Vec<u8>) -> TransportResult<u64> {
        // The delay comes first so a scripted failure can also arrive late.
        let delay = self.lock().put_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.begin(
            TransportOp::Put,
            TransportCall::Put {
                remote: remote_path.to_string(),
                bytes: contents.len(),
            },
        )?;
        let mut state = self.lock();
        let parent_exists = remote_parent(remote_path)
            .map(|p| state.dirs.contains(&p))
            .unwrap_or(true);
        if !parent_exists {
            return Err(TransportError::new(format!(
                "Failed to open remote '{remote_path}': no such file"
            )));
        }
        let len = contents.len() as u64;
        state.files.insert(remote_path.to_string(), contents);
        Ok(len)
    }

    async fn remove(&mut self, remote_path: &str) -> TransportResult<()> {
        self.begin(
            TransportOp::Remove,
            TransportCall::Remove(remote_path.to_string()),
        )?;
        match self.lock().files.remove(remote_path) {
            Some(_) => Ok(()),
            None => Err(TransportError::new(format!(
                "unlink '{remote_path}' failed: no such file"
            ))),
        }
    }

    async fn list(&mut self, remote_dir: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.begin(TransportOp::List, TransportCall::List(remote_dir.to_string()))?;
        let state = self.lock();
        if !state.dirs.contains(remote_dir) {
            return Err(TransportError::new(format!(
                "readdir '{remote_dir}' failed: no such file"
            )));
        }
        let is_child = |p: &str| remote_parent(p).as_deref() == Some(remote_dir) && p != remote_dir;
        let name_of = |p: &str| p.rsplit('/').next().unwrap_or(p).to_string();

        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|d| is_child(d.as_str()))
            .map(|d| RemoteEntry {
                name: name_of(d.as_str()),
                path: d.clone(),
                is_dir: true,
                size: 0,
                modified: None,
            })
            .collect();
        entries.extend(state.files.iter().filter(|(f, _)| is_child(f.as_str())).map(|(f, data)| {
            RemoteEntry {
                name: name_of(f.as_str()),
                path: f.clone(),
                is_dir: false,
                size: data.len() as u64,
                modified: None,
            }
        }));
        Ok(entries)
    }

    async fn close(&mut self) {
        let mut state = self.lock();
        if state.connected {
            state.calls.push(TransportCall::Close);
            state.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EndpointConfig {
        EndpointConfig::new("h", 22, "u", "p", "/r")
    }

    #[tokio::test]
    async fn put_requires_parent_directory() {
        let mut t = MemoryTransport::new();
        t.open(&config()).await.unwrap();
        let err = t.put("/r/a/b.js", b"x".to_vec()).await.unwrap_err();
        assert!(err.is_connection_loss(), "missing parent reads as no such file");

        t.ensure_dir("/r/a").await.unwrap();
        assert_eq!(t.put("/r/a/b.js", b"xy".to_vec()).await.unwrap(), 2);
        assert_eq!(t.file("/r/a/b.js").unwrap(), b"xy");
        assert!(t.has_dir("/r"));
    }

    #[tokio::test]
    async fn scripted_failure_is_consumed_once() {
        let mut t = MemoryTransport::new();
        t.open(&config()).await.unwrap();
        t.ensure_dir("/r").await.unwrap();
        t.fail_next(TransportOp::Put, "connection lost");

        assert!(t.put("/r/a.js", vec![1]).await.is_err());
        assert!(t.put("/r/a.js", vec![1]).await.is_ok());
        assert_eq!(t.puts(), vec!["/r/a.js", "/r/a.js"]);
    }

    #[tokio::test]
    async fn closed_transport_reports_not_connected() {
        let mut t = MemoryTransport::new();
        let err = t.ensure_dir("/r").await.unwrap_err();
        assert_eq!(err.message, "not connected");

        t.open(&config()).await.unwrap();
        t.close().await;
        t.close().await;
        assert_eq!(t.count(|c| *c == TransportCall::Close), 1);
    }

    #[tokio::test]
    async fn list_returns_direct_children() {
        let mut t = MemoryTransport::new();
        t.open(&config()).await.unwrap();
        t.insert_file("/r/a/b.js", b"abc");
        t.insert_file("/r/c.js", b"c");

        let mut names: Vec<(String, bool)> = t
            .list("/r")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_dir))
            .collect();
        names.sort();
        assert_eq!(names, vec![("a".into(), true), ("c.js".into(), false)]);
    }

    #[tokio::test]
    async fn removing_missing_file_fails() {
        let mut t = MemoryTransport::new();
        t.open(&config()).await.unwrap();
        let err = t.remove("/r/nope.js").await.unwrap_err();
        assert!(err.message.contains("no such file"));
    }
}
