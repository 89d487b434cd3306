// ── libssh2-backed transport ─────────────────────────────────────────────────
//
// libssh2 is blocking; every call runs on tokio's blocking pool with a clone
// of the session handle.  A fresh SFTP channel is opened per operation.

use crate::sftp::error::TransportError;
use crate::sftp::transport::{SftpTransport, TransportResult};
use crate::sftp::types::{EndpointConfig, RemoteEntry, SessionInfo};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use ssh2::{ErrorCode, Session};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const CHUNK_SIZE: usize = 256 * 1024;

// libssh2 session error codes that mean the socket is gone.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;

#[derive(Default)]
pub struct Ssh2Transport {
    session: Option<Session>,
}

impl Ssh2Transport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn blocking<T, F>(&self, op: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> TransportResult<T> + Send + 'static,
    {
        let session = self
            .session
            .clone()
            .ok_or_else(|| TransportError::new("not connected"))?;
        tokio::task::spawn_blocking(move || op(&session))
            .await
            .map_err(|e| TransportError::new(format!("SFTP worker failed: {e}")))?
    }
}

#[async_trait]
impl SftpTransport for Ssh2Transport {
    async fn open(&mut self, config: &EndpointConfig) -> TransportResult<SessionInfo> {
        self.close().await;
        let config = config.clone();
        let (session, info) = tokio::task::spawn_blocking(move || connect(&config))
            .await
            .map_err(|e| TransportError::new(format!("SFTP worker failed: {e}")))??;
        self.session = Some(session);
        Ok(info)
    }

    async fn ensure_dir(&mut self, remote_dir: &str) -> TransportResult<()> {
        let path = remote_dir.to_string();
        self.blocking(move |session| mkdir_p(session, &path)).await
    }

    async fn put(&mut self, remote_path: &str, contents: Vec<u8>) -> TransportResult<u64> {
        let path = remote_path.to_string();
        self.blocking(move |session| {
            let sftp = session
                .sftp()
                .map_err(|e| map_ssh_error("SFTP channel error", e))?;
            let mut remote_file = sftp
                .open_mode(
                    Path::new(&path),
                    ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                    0o644,
                    ssh2::OpenType::File,
                )
                .map_err(|e| map_ssh_error(&format!("Failed to open remote '{path}'"), e))?;

            for chunk in contents.chunks(CHUNK_SIZE) {
                remote_file.write_all(chunk).map_err(TransportError::from)?;
            }
            debug!("SFTP put {} ({} bytes)", path, contents.len());
            Ok(contents.len() as u64)
        })
        .await
    }

    async fn remove(&mut self, remote_path: &str) -> TransportResult<()> {
        let path = remote_path.to_string();
        self.blocking(move |session| {
            let sftp = session
                .sftp()
                .map_err(|e| map_ssh_error("SFTP channel error", e))?;
            sftp.unlink(Path::new(&path))
                .map_err(|e| map_ssh_error(&format!("unlink '{path}' failed"), e))?;
            info!("SFTP delete: {}", path);
            Ok(())
        })
        .await
    }

    async fn list(&mut self, remote_dir: &str) -> TransportResult<Vec<RemoteEntry>> {
        let path = remote_dir.to_string();
        self.blocking(move |session| {
            let sftp = session
                .sftp()
                .map_err(|e| map_ssh_error("SFTP channel error", e))?;
            let raw_entries = sftp
                .readdir(Path::new(&path))
                .map_err(|e| map_ssh_error(&format!("readdir '{path}' failed"), e))?;

            let mut entries: Vec<RemoteEntry> = raw_entries
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if name == "." || name == ".." {
                        return None;
                    }
                    Some(RemoteEntry {
                        name,
                        path: entry_path.to_string_lossy().replace('\\', "/"),
                        is_dir: stat.is_dir(),
                        size: stat.size.unwrap_or(0),
                        modified: stat.mtime,
                    })
                })
                .collect();
            entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
            Ok(entries)
        })
        .await
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = session.disconnect(None, "Client disconnecting", None);
            })
            .await;
            info!("SFTP session closed");
        }
    }
}

// ── Connect & authenticate ───────────────────────────────────────────────────

fn connect(config: &EndpointConfig) -> TransportResult<(Session, SessionInfo)> {
    let addr = config.address();
    info!("SFTP connecting to {}", addr);

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| TransportError::new(format!("Invalid address '{addr}': {e}")))?
        .next()
        .ok_or_else(|| TransportError::new(format!("'{addr}' did not resolve")))?;

    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| TransportError::new(format!("TCP connection to {addr} failed: {e}")))?;

    let mut session = Session::new()
        .map_err(|e| TransportError::new(format!("Failed to create SSH session: {e}")))?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| TransportError::new(format!("SSH handshake failed: {e}")))?;

    let banner = session.banner().map(|b| b.to_string());
    let fingerprint = session.host_key_hash(ssh2::HashType::Sha256).map(|bytes| {
        let encoded =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
        format!("SHA256:{}", encoded)
    });

    let auth_method = authenticate(&session, config)
        .map_err(|e| TransportError::new(format!("Authentication failed: {e}")))?;
    if !session.authenticated() {
        return Err(TransportError::new(
            "Authentication failed: not authenticated after auth attempt",
        ));
    }
    info!("SFTP authenticated to {} via {}", addr, auth_method);

    let keepalive = config.keepalive_interval_secs;
    session.set_keepalive(keepalive > 0, keepalive.min(u32::MAX as u64) as u32);

    let info = SessionInfo {
        id: Uuid::new_v4().to_string(),
        host: config.host.clone(),
        port: config.port,
        username: config.username.clone(),
        auth_method,
        server_banner: banner,
        host_key_fingerprint: fingerprint,
        connected_at: Utc::now(),
    };
    Ok((session, info))
}

fn authenticate(session: &Session, config: &EndpointConfig) -> Result<String, String> {
    // 1. Agent
    if config.use_agent {
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() {
                let _ = agent.list_identities();
                for identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(&config.username, &identity).is_ok() {
                        return Ok("agent".to_string());
                    }
                }
            }
        }
    }

    // 2. Explicit key file
    if let Some(ref key_path) = config.private_key_path {
        let passphrase = config.private_key_passphrase.as_deref();
        session
            .userauth_pubkey_file(&config.username, None, Path::new(key_path), passphrase)
            .map_err(|e| format!("Public-key auth failed: {}", e))?;
        if session.authenticated() {
            return Ok("publickey".to_string());
        }
    }

    // 3. Default keys when no password is configured
    if config.password.is_none() {
        if let Some(ssh_dir) = dirs::home_dir().map(|h| h.join(".ssh")) {
            for name in &["id_ed25519", "id_rsa", "id_ecdsa"] {
                let path = ssh_dir.join(name);
                if path.exists()
                    && session
                        .userauth_pubkey_file(&config.username, None, &path, None)
                        .is_ok()
                    && session.authenticated()
                {
                    return Ok(format!("publickey-default({})", name));
                }
            }
        }
    }

    // 4. Password, then keyboard-interactive
    if let Some(ref password) = config.password {
        if session.userauth_password(&config.username, password).is_ok()
            && session.authenticated()
        {
            return Ok("password".to_string());
        }

        struct PasswordPrompt(String);

        impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
            fn prompt(
                &mut self,
                _username: &str,
                _instructions: &str,
                prompts: &[ssh2::Prompt],
            ) -> Vec<String> {
                prompts.iter().map(|_| self.0.clone()).collect()
            }
        }

        let mut prompt = PasswordPrompt(password.clone());
        if session
            .userauth_keyboard_interactive(&config.username, &mut prompt)
            .is_ok()
            && session.authenticated()
        {
            return Ok("keyboard-interactive".to_string());
        }
    }

    Err("No authentication method succeeded".to_string())
}

// ── Directory helpers ────────────────────────────────────────────────────────

fn mkdir_p(session: &Session, path: &str) -> TransportResult<()> {
    let sftp = session
        .sftp()
        .map_err(|e| map_ssh_error("SFTP channel error", e))?;

    let absolute = path.starts_with('/');
    let mut current = String::new();
    for part in path.split('/').filter(|s| !s.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);

        if sftp.stat(Path::new(&current)).is_ok() {
            continue;
        }
        if let Err(e) = sftp.mkdir(Path::new(&current), 0o755) {
            // Lost a race with another mkdir, or the server refuses mkdir on
            // an existing path with a generic failure.
            if sftp.stat(Path::new(&current)).map(|s| s.is_dir()).unwrap_or(false) {
                continue;
            }
            warn!("SFTP mkdir '{}' failed: {}", current, e);
            return Err(map_ssh_error(
                &format!("mkdir -p '{path}' failed at '{current}'"),
                e,
            ));
        }
    }

    debug!("SFTP mkdir -p: {}", path);
    Ok(())
}

/// Render an ssh2 error, tagging socket-level failures as connection loss.
fn map_ssh_error(context: &str, e: ssh2::Error) -> TransportError {
    match e.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => TransportError::new(format!("{context}: connection lost ({e})")),
        ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE) => {
            TransportError::new(format!("{context}: no such file"))
        }
        _ => TransportError::new(format!("{context}: {e}")),
    }
}
