//! Child-process execution of the extraction tool.
//!
//! A run is a scoped resource: spawn, wait for exit and drain both pipes
//! under one deadline, and on timeout or cancellation kill and reap the
//! child before returning. `kill_on_drop` covers every remaining
//! early-return path.

use crate::extract::command::ExtractionCommand;
use crate::traits::ExtractionError;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ============================================================================
// Cancellation
// ============================================================================

/// Sending half of a cooperative cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into every task that should observe cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a linked cancellation handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pending forever if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// Tool Output
// ============================================================================

/// Captured result of one extraction process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// How a finished run is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolVerdict {
    Success,
    /// Non-zero exit but stdout still carries metadata
    SoftFailure,
    /// Non-zero exit and nothing usable on stdout
    HardFailure,
}

impl ToolOutput {
    pub fn verdict(&self) -> ToolVerdict {
        match self.exit_code {
            Some(0) => ToolVerdict::Success,
            _ if !self.stdout.is_empty() => ToolVerdict::SoftFailure,
            _ => ToolVerdict::HardFailure,
        }
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

// ============================================================================
// Runner Trait
// ============================================================================

/// Executes an extraction command. Implementations must not outlive
/// `limit` and must stop promptly once `cancel` fires.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &ExtractionCommand,
        limit: Duration,
        cancel: &CancelSignal,
    ) -> Result<ToolOutput, ExtractionError>;
}

/// Runs the tool as a real child process via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

type Captured = std::io::Result<Vec<u8>>;

enum WaitOutcome {
    Finished {
        status: std::io::Result<ExitStatus>,
        stdout: Result<Captured, tokio::task::JoinError>,
        stderr: Result<Captured, tokio::task::JoinError>,
    },
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &ExtractionCommand,
        limit: Duration,
        cancel: &CancelSignal,
    ) -> Result<ToolOutput, ExtractionError> {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.flags)
            .arg(&command.input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractionError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        debug!(pid = ?child.id(), program = %command.program, "Spawned extraction process");

        let mut stdout_reader = spawn_reader(child.stdout.take());
        let mut stderr_reader = spawn_reader(child.stderr.take());

        // The deadline covers draining the pipes too: a descendant that
        // inherited them can keep them open after the tool itself exits.
        let mut cancel = cancel.clone();
        let outcome = tokio::select! {
            finished = tokio::time::timeout(limit, async {
                let status = child.wait().await;
                let stdout = (&mut stdout_reader).await;
                let stderr = (&mut stderr_reader).await;
                (status, stdout, stderr)
            }) => match finished {
                Ok((status, stdout, stderr)) => WaitOutcome::Finished { status, stdout, stderr },
                Err(_) => WaitOutcome::TimedOut,
            },
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::Finished {
                status,
                stdout,
                stderr,
            } => Ok(ToolOutput {
                exit_code: status?.code(),
                stdout: captured(stdout)?,
                stderr: captured(stderr)?,
            }),
            WaitOutcome::TimedOut => {
                terminate(&mut child, &stdout_reader, &stderr_reader).await;
                Err(ExtractionError::Timeout { limit })
            }
            WaitOutcome::Cancelled => {
                terminate(&mut child, &stdout_reader, &stderr_reader).await;
                Err(ExtractionError::Cancelled)
            }
        }
    }
}

fn spawn_reader<R>(stream: Option<R>) -> JoinHandle<Captured>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            stream.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

fn captured(joined: Result<Captured, tokio::task::JoinError>) -> Result<Vec<u8>, ExtractionError> {
    joined
        .map_err(|e| ExtractionError::Io(std::io::Error::other(e)))?
        .map_err(ExtractionError::Io)
}

/// Kills and reaps the child if it is still running, then aborts the
/// readers so pipes held open by a descendant are released.
async fn terminate(
    child: &mut Child,
    stdout_reader: &JoinHandle<Captured>,
    stderr_reader: &JoinHandle<Captured>,
) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(?pid, ?status, "Extraction process exited but its pipes are still open");
        }
        _ => {
            if let Err(e) = child.kill().await {
                warn!(?pid, error = %e, "Failed to kill extraction process");
            } else {
                debug!(?pid, "Extraction process killed");
            }
        }
    }
    stdout_reader.abort();
    stderr_reader.abort();
}
