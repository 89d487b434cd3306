//! # rumo-core
//!
//! Pieces shared by every rumo-sync crate:
//!   • [`notifications`] – the host-facing sink for human-readable status and
//!     error messages
//!   • [`diagnostics`] – DNS / TCP / banner probes used to explain why an
//!     endpoint cannot be reached

pub mod diagnostics;
pub mod notifications;

pub use diagnostics::{DiagnosticReport, DiagnosticStep, StepStatus};
pub use notifications::{
    LogNotifier, MemoryNotifier, Notification, NotificationLevel, NotificationSink,
};
