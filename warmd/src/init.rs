//! Tracing setup
//!
//! Logs go to stderr. The daemon's stderr is redirected into the per-project
//! log file by the client that spawned it, so daemon output is verbose and
//! timestamped. Client invocations share a terminal with tool output and
//! only report warnings by default.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Which side of the control socket this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    /// `warmd start`: writes into the per-project log file
    Daemon,
    /// Every other command: writes to the user's terminal
    Client,
}

impl LogRole {
    /// Default `warmd` level for a `-v` count
    fn level(self, verbose: u8) -> &'static str {
        match (self, verbose) {
            (LogRole::Daemon, 0) => "info",
            (LogRole::Client, 0) => "warn",
            (_, 1) => "debug",
            _ => "trace",
        }
    }
}

/// Initialize tracing/logging
///
/// - Environment-based filtering via RUST_LOG, default level per role
/// - No ANSI colours
/// - `LOG_FORMAT=json` for structured JSON output
pub fn init_tracing(role: LogRole, verbose: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("warmd={}", role.level(verbose)).parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match (use_json, role) {
        (true, _) => registry.with(layer.json()).init(),
        (false, LogRole::Daemon) => registry.with(layer).init(),
        (false, LogRole::Client) => registry
            .with(layer.without_time().with_target(false))
            .init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_per_role() {
        assert_eq!(LogRole::Daemon.level(0), "info");
        assert_eq!(LogRole::Client.level(0), "warn");
        assert_eq!(LogRole::Client.level(1), "debug");
        assert_eq!(LogRole::Daemon.level(5), "trace");
    }
}
