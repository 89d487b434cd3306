//! # rumo-sftp
//!
//! The sync client half of rumo-sync:
//!   • Endpoint configuration (`sftp.json`) parsing with serde defaults
//!   • Local → remote path mapping with forward-slash normalisation
//!   • An async transport seam with an ssh2 implementation and an
//!     in-memory implementation for dry runs
//!   • `RemoteSyncClient`: connect / reconnect / upload / delete / list with
//!     connection-loss classification and reconnect side effects

pub mod sftp;

pub use sftp::*;
