// ── Types ─────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_sftp_port() -> u16 {
    22
}
fn default_false() -> bool {
    false
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_keepalive_secs() -> u64 {
    60
}

// ── Endpoint configuration ───────────────────────────────────────────────────

/// Contents of `.vscode/sftp.json`.  One immutable snapshot per connection.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    #[serde(default = "default_false")]
    pub use_agent: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
}

impl EndpointConfig {
    /// Minimal password config, mostly for hosts that build one in code.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Some(password.into()),
            remote_path: remote_path.into(),
            private_key_path: None,
            private_key_passphrase: None,
            use_agent: false,
            timeout_secs: default_timeout_secs(),
            keepalive_interval_secs: default_keepalive_secs(),
        }
    }

    /// Returns the name of the first required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.host.trim().is_empty() {
            Some("host")
        } else if self.username.trim().is_empty() {
            Some("username")
        } else if self.remote_path.trim().is_empty() {
            Some("remotePath")
        } else {
            None
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Secrets stay out of log lines.
impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("remote_path", &self.remote_path)
            .field("private_key_path", &self.private_key_path)
            .field("use_agent", &self.use_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("keepalive_interval_secs", &self.keepalive_interval_secs)
            .finish()
    }
}

// ── Connection state ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// How an operation reacts to a connection-loss failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Mark the client disconnected and reconnect before reporting the error.
    Reconnect,
    /// Report the error only.  Used by the single retry after a reconnect.
    None,
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    pub server_banner: Option<String>,
    /// SHA256 of the server host key, base64 encoded.
    pub host_key_fingerprint: Option<String>,
    pub connected_at: DateTime<Utc>,
}

// ── Remote listing ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Seconds since the epoch, when the server reports it.
    pub modified: Option<u64>,
}

// ── Bulk upload ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedUpload {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadReport {
    pub uploaded: usize,
    pub failed: Vec<FailedUpload>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BulkUploadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.failed.is_empty() {
            format!("Uploaded {} file(s)", self.uploaded)
        } else {
            format!(
                "Uploaded {} file(s), {} failed",
                self.uploaded,
                self.failed.len()
            )
        }
    }
}
