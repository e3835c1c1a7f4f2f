//! Gated command execution.
//!
//! The engine never spawns processes itself. It classifies the command,
//! snapshots the paths the caller tracks and hands the command to a
//! [`CommandExecutor`]. Whatever the command changed among the tracked
//! paths becomes one transaction.

use crate::transaction::TransactionSummary;
use async_trait::async_trait;
use osaka_execpolicy::CommandVerdict;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

use crate::config::DEFAULT_COMMAND_TIMEOUT;

/// A request to run one shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,

    /// The user explicitly confirmed a `needs-confirmation` verdict.
    #[serde(default)]
    pub confirmed: bool,

    /// Workspace paths whose changes should be undoable.
    #[serde(default)]
    pub tracked_paths: Vec<PathBuf>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            confirmed: false,
            tracked_paths: Vec::new(),
        }
    }

    /// Builder: mark as confirmed by the user.
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// Builder: track a path.
    pub fn track(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracked_paths.push(path.into());
        self
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Why the executor could not report a finished command.
///
/// A non-zero exit status is not an error: the command ran and its effects
/// are kept.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

/// Runs a classified command. The conversation layer supplies one.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecError>;
}

/// Result of [`Engine::run_command`](crate::Engine::run_command).
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub verdict: CommandVerdict,
    pub output: CommandOutput,
    /// The transaction recording changes to tracked paths, if any changed.
    pub transaction: Option<TransactionSummary>,
}

/// Runs commands through the platform shell with a timeout.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    timeout: Duration,
    env: HashMap<String, String>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            env: HashMap::new(),
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set an environment variable for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .current_dir(cwd)
            .envs(&self.env)
            // No interactive prompts.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(ExecError::Spawn)?;

        // On timeout the child is dropped, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(self.timeout))?
            .map_err(|e| ExecError::Other(format!("failed to wait: {e}")))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shell_executor_captures_output() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new().with_env("OSAKA_TEST_VALUE", "42");

        let output = executor
            .execute("echo out; echo err >&2; echo $OSAKA_TEST_VALUE; exit 3", dir.path())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout, "out\n42\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_shell_executor_runs_in_cwd() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new();

        executor.execute("echo hi > here.txt", dir.path()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("here.txt")).unwrap(),
            "hi\n"
        );
    }

    #[tokio::test]
    async fn test_shell_executor_times_out() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new().with_timeout(Duration::from_millis(100));

        let err = executor.execute("sleep 5", dir.path()).await.unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));
    }

    #[test]
    fn test_request_builder() {
        let request = CommandRequest::new("cargo fmt").confirmed().track("src/lib.rs");
        assert!(request.confirmed);
        assert_eq!(request.tracked_paths, vec![PathBuf::from("src/lib.rs")]);

        let parsed: CommandRequest = serde_json::from_str(r#"{"command":"ls"}"#).unwrap();
        assert!(!parsed.confirmed);
        assert!(parsed.tracked_paths.is_empty());
    }
}
