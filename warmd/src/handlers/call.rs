//! Tool call command handler

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;

use crate::config::Settings;
use crate::daemon::DaemonClient;

/// Parse the JSON arguments given on the command line
fn parse_args(raw: &str) -> std::result::Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON arguments: {}", e)),
    }
}

/// Handle the `call` command
///
/// Prints the tool's text to stdout and returns 1 when the tool reported an
/// error. Invalid arguments fail before any daemon is contacted.
pub async fn run_call(
    project: &Path,
    settings: Settings,
    config: Option<PathBuf>,
    tool: &str,
    args: &str,
) -> Result<i32> {
    let args = match parse_args(args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(1);
        }
    };

    let client = DaemonClient::new(project, settings)?.with_config_path(config);
    match client.ensure_and_call(tool, args).await {
        Ok((text, code)) => {
            println!("{}", text);
            Ok(code)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(1)
        }
    }
}
