//! # vaultsync-backend
//!
//! The capability interface over "a local repository with a single remote",
//! and its two implementations:
//!
//! - [`ShellBackend`]: desktop; drives the system `git` binary in the vault.
//! - [`EmbeddedBackend`]: sandboxed; libgit2 on a fixed logical root with
//!   token credentials.
//!
//! Call [`open_backend`] once per process to probe the environment and build
//! the right one. The sync engine only ever sees `dyn Backend`.

mod backend;
pub mod embedded;
pub mod error;
mod probe;
mod process;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;
pub mod shell;

pub use backend::{Backend, REMOTE_NAME};
pub use embedded::EmbeddedBackend;
pub use error::BackendError;
pub use probe::{detect_kind, open_backend, resolve_git_binary};
#[cfg(any(test, feature = "testing"))]
pub use scripted::{Call, ScriptedBackend, ScriptedFailure, ScriptedPull};
pub use shell::ShellBackend;
