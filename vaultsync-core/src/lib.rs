//! vaultsync core library: domain types, settings persistence, errors.
//!
//! Public API surface:
//! - [`types`]: repository state snapshots and backend result types
//! - [`error`]: [`ConfigError`]
//! - [`config`]: [`SyncConfig`] load / save / validate

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendPreference, MissingSetting, SyncConfig};
pub use error::ConfigError;
pub use types::{
    BackendKind, CommitId, ConflictReport, FailureKind, PullOutcome, RemoteRef, RepositoryState,
};
