//! Session provider: named tmux sessions with fixed windows

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::{tmux_command, tmux_command_checked};
use crate::error::{Result, TmuxError};

/// One named window in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Window name
    pub name: String,
    /// Command run in the window; a plain shell when absent
    pub command: Option<String>,
}

impl WindowSpec {
    pub fn shell(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
        }
    }

    pub fn with_command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
        }
    }
}

/// Creates, probes, kills and attaches to named tmux sessions.
///
/// Stateless; tmux's server is the source of truth for which sessions exist.
#[derive(Debug, Clone, Default)]
pub struct TmuxSessions {
    /// Dedicated server socket name; tests use one to stay off the
    /// operator's tmux server
    socket: Option<String>,
}

impl TmuxSessions {
    pub fn new() -> Self {
        Self { socket: None }
    }

    /// Use a dedicated tmux server socket
    pub fn on_socket(socket: impl Into<String>) -> Self {
        Self {
            socket: Some(socket.into()),
        }
    }

    fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    /// Create a detached session rooted at `work_dir` with the given named
    /// windows. The environment applies to every window.
    pub async fn create_session(
        &self,
        name: &str,
        work_dir: &Path,
        windows: &[WindowSpec],
        env: &HashMap<String, String>,
    ) -> Result<()> {
        let Some((first, rest)) = windows.split_first() else {
            return Err(TmuxError::NoWindows {
                name: name.to_string(),
            });
        };

        if self.exists(name).await? {
            return Err(TmuxError::SessionExists {
                name: name.to_string(),
            });
        }

        info!("Creating tmux session {} at {:?}", name, work_dir);

        let work_dir_str = work_dir.to_string_lossy();
        let mut args: Vec<String> = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            name.to_string(),
            "-c".to_string(),
            work_dir_str.to_string(),
            "-n".to_string(),
            first.name.clone(),
        ];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(command) = &first.command {
            args.push(command.clone());
        }
        self.run_checked(&args).await?;

        for window in rest {
            let mut args: Vec<String> = vec![
                "new-window".to_string(),
                "-d".to_string(),
                "-t".to_string(),
                name.to_string(),
                "-c".to_string(),
                work_dir_str.to_string(),
                "-n".to_string(),
                window.name.clone(),
            ];
            if let Some(command) = &window.command {
                args.push(command.clone());
            }
            self.run_checked(&args).await?;
        }

        Ok(())
    }

    /// Whether a session with this name exists
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let target = format!("={}", name);
        let output = tmux_command(self.socket(), &["has-session", "-t", &target]).await?;
        Ok(output.success)
    }

    /// Kill a session; killing an absent session is an error
    pub async fn kill(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            return Err(TmuxError::SessionNotFound {
                name: name.to_string(),
            });
        }
        info!("Killing tmux session {}", name);
        let target = format!("={}", name);
        self.run_checked(&[
            "kill-session".to_string(),
            "-t".to_string(),
            target,
        ])
        .await?;
        Ok(())
    }

    /// List session names
    pub async fn list(&self) -> Result<Vec<String>> {
        let output =
            tmux_command(self.socket(), &["list-sessions", "-F", "#{session_name}"]).await?;
        // tmux exits nonzero when the server is not running; that just means
        // no sessions
        if !output.success {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Attach to a session, replacing the calling process image. Only returns
    /// on failure to exec.
    pub async fn attach(&self, name: &str) -> Result<std::convert::Infallible> {
        use std::os::unix::process::CommandExt;

        if !self.exists(name).await? {
            return Err(TmuxError::SessionNotFound {
                name: name.to_string(),
            });
        }

        let mut command = std::process::Command::new("tmux");
        if let Some(socket) = self.socket() {
            command.arg("-L").arg(socket);
        }
        let err = command
            .arg("attach-session")
            .arg("-t")
            .arg(format!("={}", name))
            .exec();
        Err(TmuxError::command_failed_with_source(
            "Failed to exec tmux attach",
            err,
        ))
    }

    async fn run_checked(&self, args: &[String]) -> Result<String> {
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        tmux_command_checked(self.socket(), &arg_refs).await
    }
}
