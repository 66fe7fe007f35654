//! Per-project daemon that keeps an MCP tool server warm behind a Unix socket
//!
//! Starting a tool server like a language-server-backed MCP process can take
//! tens of seconds. `warmd` starts it once per project, completes the MCP
//! handshake, and lets short-lived `warmd call` invocations reuse it.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod handlers;
pub mod init;
pub mod peer;

pub use config::Settings;
pub use daemon::{Daemon, DaemonClient, DaemonPaths, ToolOutput};
pub use error::{DaemonError, Result};
