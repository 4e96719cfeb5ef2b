//! Runs a local speech engine as a one-shot subprocess.
//!
//! Both speech adapters work the same way: spawn the engine, feed the
//! request on stdin, collect stdout. The child is killed if the caller's
//! future is dropped, so an aborted turn never leaves an engine running.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Why an engine run produced no output.
#[derive(Debug)]
pub enum EngineFailure {
    Spawn(std::io::Error),
    Stdin(std::io::Error),
    Wait(std::io::Error),
    TimedOut(Duration),
    /// Non-zero exit; carries the engine's stderr.
    Exit(String),
}

impl EngineFailure {
    /// Renders the failure for an engine named `engine`.
    pub fn describe(&self, engine: &str) -> String {
        match self {
            Self::Spawn(e) => format!("Failed to spawn {}: {}", engine, e),
            Self::Stdin(e) => format!("Failed to write to {} stdin: {}", engine, e),
            Self::Wait(e) => format!("Failed to wait for {}: {}", engine, e),
            Self::TimedOut(limit) => {
                format!("{} timed out after {} seconds", engine, limit.as_secs())
            }
            Self::Exit(stderr) => format!("{} failed: {}", engine, stderr.trim()),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe("engine"))
    }
}

/// Runs `command` with `input` on stdin and returns its stdout.
///
/// Stdin is written from its own task so an engine that starts producing
/// output before reading all its input cannot deadlock on a full pipe.
pub async fn run(
    mut command: Command,
    input: Vec<u8>,
    limit: Duration,
) -> Result<Vec<u8>, EngineFailure> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(EngineFailure::Spawn)?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineFailure::Stdin(std::io::ErrorKind::BrokenPipe.into()))?;

    let writer = tokio::spawn(async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    });

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| EngineFailure::TimedOut(limit))?
        .map_err(EngineFailure::Wait)?;

    match writer.await {
        Ok(Ok(())) => {}
        // An engine that exits early closes its stdin; its exit status is
        // the more useful error.
        Ok(Err(e)) if output.status.success() => return Err(EngineFailure::Stdin(e)),
        Ok(Err(_)) => {}
        Err(e) => return Err(EngineFailure::Stdin(std::io::Error::other(e))),
    }

    if !output.status.success() {
        return Err(EngineFailure::Exit(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(output.stdout)
}
