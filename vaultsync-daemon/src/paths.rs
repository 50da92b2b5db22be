use std::path::{Path, PathBuf};

use vaultsync_core::config::vaultsync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    vaultsync_root(home).join(DAEMON_SOCKET)
}
