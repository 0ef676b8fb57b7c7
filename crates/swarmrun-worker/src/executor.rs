//! Task execution.
//!
//! [`CommandExecutor`] runs an external program per task: the payload is
//! written to its stdin as JSON and its stdout becomes the task output.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors that can occur during task execution. All of them are retryable.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to run command: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command exited with {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Task failed: {0}")]
    Failed(String),
}

/// Runs one task payload to completion.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError>;
}

#[async_trait]
impl<T: TaskExecutor + ?Sized> TaskExecutor for Arc<T> {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        (**self).execute(payload).await
    }
}

/// Executes tasks with an external command.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace. `None` if it is empty.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let input = serde_json::to_vec(payload).map_err(|e| ExecutionError::Failed(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(&input).await {
                warn!(error = %e, program = %self.program, "Could not write payload to stdin");
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ExecutionError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        debug!(program = %self.program, bytes = stdout.len(), "Command finished");

        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}
