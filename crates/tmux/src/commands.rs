//! Tmux command execution utilities

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{Result, TmuxError};

/// Output from a tmux command
#[derive(Debug)]
pub struct TmuxOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Execute a tmux command, optionally on a dedicated server socket
pub async fn tmux_command(socket: Option<&str>, args: &[&str]) -> Result<TmuxOutput> {
    debug!("Running tmux {:?}", args);

    let mut command = Command::new("tmux");
    if let Some(socket) = socket {
        command.arg("-L").arg(socket);
    }

    let output = command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| TmuxError::command_failed_with_source("Failed to execute tmux", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    trace!("tmux stdout: {}", stdout);
    if !stderr.is_empty() {
        trace!("tmux stderr: {}", stderr);
    }

    Ok(TmuxOutput {
        stdout,
        stderr,
        success: output.status.success(),
    })
}

/// Execute a tmux command and return error if it fails
pub async fn tmux_command_checked(socket: Option<&str>, args: &[&str]) -> Result<String> {
    let output = tmux_command(socket, args).await?;

    if !output.success {
        return Err(TmuxError::command_failed(format!(
            "tmux {} failed: {}",
            args.join(" "),
            output.stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Whether the tmux binary is available on this host
pub async fn tmux_available() -> bool {
    tmux_command(None, &["-V"])
        .await
        .map(|o| o.success)
        .unwrap_or(false)
}
