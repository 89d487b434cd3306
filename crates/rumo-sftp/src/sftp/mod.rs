// ── rumo-sftp / sftp module ───────────────────────────────────────────────────
//
// Mirror client for the build-output tree:
//   • Endpoint config (`sftp.json`) with serde defaults
//   • Path mapping from the watched root onto the remote root
//   • SftpTransport seam (libssh2 and in-memory implementations)
//   • RemoteSyncClient with connection-loss classification and reconnect

pub mod types;
pub mod error;
pub mod config;
pub mod paths;
pub mod transport;
pub mod ssh2_transport;
pub mod memory;
pub mod client;

pub use types::*;
pub use error::{SyncError, SyncResult, TransportError};
pub use config::{load_config, parse_config};
pub use paths::{remote_parent, PathMapper, TrackedExtensions};
pub use transport::{SftpTransport, TransportResult};
pub use ssh2_transport::Ssh2Transport;
pub use memory::{MemoryTransport, TransportCall, TransportOp};
pub use client::RemoteSyncClient;
