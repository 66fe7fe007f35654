//! Per-project daemon
//!
//! One daemon per project root keeps a single peer process warm and serves
//! tool calls to short-lived clients over a Unix socket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     Unix Socket     ┌──────────────────┐   stdio    ┌────────────┐
//! │ warmd call  │ ←────────────────→  │  warmd daemon    │ ←────────→ │    peer    │
//! └─────────────┘  one doc each way   └──────────────────┘  JSON-RPC  └────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! warmd call . find_symbol '{"name_path": "main"}'   # starts the daemon if needed
//! warmd status .
//! warmd stop .
//! ```

mod client;
mod lifecycle;
pub mod liveness;
pub mod lock;
pub mod paths;
pub mod protocol;
mod server;

pub use client::{DaemonClient, DaemonStatus, StopOutcome};
pub use lifecycle::{Daemon, DaemonState};
pub use liveness::is_running;
pub use paths::{DaemonPaths, ProjectId};
pub use protocol::{DaemonRequest, ToolOutput};
pub use server::SocketServer;
