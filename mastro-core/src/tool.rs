use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors raised while invoking an external audio tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with status {status:?}: {stderr}")]
    CommandFailure {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{program} timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },
}

/// Seam for running external commands, so tests can substitute the audio
/// tools with scripted stand-ins.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemToolExecutor;

#[async_trait]
impl ToolExecutor for SystemToolExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Runs a tool under a wall-clock limit and maps non-zero exits to errors.
/// Dropping the future on timeout reaps the child via `kill_on_drop`.
pub(crate) async fn run_tool(
    executor: &dyn ToolExecutor,
    program: &Path,
    args: &[String],
    limit: Duration,
) -> Result<Output, ToolError> {
    let name = program.display().to_string();
    match timeout(limit, executor.run(program, args)).await {
        Ok(Ok(output)) if output.status.success() => Ok(output),
        Ok(Ok(output)) => Err(ToolError::CommandFailure {
            program: name,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Ok(Err(source)) => Err(ToolError::Launch {
            program: name,
            source,
        }),
        Err(_) => Err(ToolError::Timeout {
            program: name,
            limit,
        }),
    }
}
