//! # rumo-watch
//!
//! Change detection for the build-output tree:
//!   • Classification of raw `notify` events into created / changed / deleted
//!   • Per-path debounce with cancel-and-replace and a stale-upload guard
//!   • Reconnect-and-retry-once policy around client operations
//!   • A directory watcher that keeps one handle per directory, including
//!     directories created after the watch started

pub mod watch;

pub use watch::*;
