//! Long-running sync service: scheduler + job processor + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use protocol::{
    request_check, request_status, request_stop, request_sync, send_request, Command,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, serve, start_blocking, Services, SessionSummary};
pub use scheduler::{SchedulerHandle, SyncScheduler};
