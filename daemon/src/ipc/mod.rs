//! IPC module for daemon-UI communication

mod protocol;
mod server;

pub use protocol::{Command, CommandRequest, DaemonStatus, Response};
#[cfg(target_os = "macos")]
pub use server::Server;
