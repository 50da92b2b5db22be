pub mod config;
pub mod daemon;
pub mod init;
pub mod status;
pub mod sync;
