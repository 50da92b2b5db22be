//! # vaultsync-sync
//!
//! Sync orchestration over a [`vaultsync_backend::Backend`].
//!
//! [`Orchestrator::run`] drives one commit → fetch → pull → push session and
//! never lets two overlap. [`StatusMonitor`] compares local and remote heads
//! and decides whether to notify or sync. Everything user-facing flows out as
//! [`SyncEvent`]s through a [`Notifier`].

pub mod event;
pub mod message;
pub mod monitor;
pub mod orchestrator;
pub mod session;

pub use event::{FanoutNotifier, Notifier, RecordingNotifier, SyncEvent, TracingNotifier};
pub use message::{commit_message, device_name};
pub use monitor::{Divergence, StatusCheck, StatusMonitor, StatusReport};
pub use orchestrator::Orchestrator;
pub use session::{FailureReason, Outcome, Phase, SyncAttempt, SyncSession};
