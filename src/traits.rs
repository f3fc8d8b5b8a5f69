use crate::model::{FailureKind, InputFailure, InputFile, OutputFile, OutputFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Fatal condition for a single input. Other inputs in the task carry on.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Input unavailable: {path}: {reason}")]
    InputUnavailable { path: PathBuf, reason: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Extraction failed with exit code {}: {stderr}", display_code(.exit_code))]
    HardFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractionError::InputUnavailable { .. } => FailureKind::InputUnavailable,
            ExtractionError::Spawn { .. } => FailureKind::ToolUnavailable,
            ExtractionError::Timeout { .. } => FailureKind::ToolExecutionTimeout,
            ExtractionError::HardFailure { .. } => FailureKind::ToolHardFailure,
            ExtractionError::Cancelled => FailureKind::Cancelled,
            ExtractionError::Io(_) => FailureKind::Io,
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (killed by signal)".to_string(),
    }
}

/// Task-level outcome reported back to the queue instead of a result.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task has no input files")]
    EmptyTask,

    #[error("All {} input(s) failed: {}", .failures.len(), summarize(.failures))]
    TotalFailure { failures: Vec<InputFailure> },

    /// `completed` counts inputs attempted before the cancel, failed ones
    /// included.
    #[error("Task cancelled after {completed} input(s)")]
    Cancelled { completed: usize },

    #[error("Worker error: {0}")]
    Worker(String),
}

fn summarize(failures: &[InputFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.display_name, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// What the storage layer needs to create one output artifact.
#[derive(Debug, Clone)]
pub struct OutputRequest<'a> {
    pub task_id: &'a str,
    /// Position of the input within the task
    pub index: usize,
    pub input: &'a InputFile,
    pub format: OutputFormat,
}

/// Storage collaborator: resolves inputs and persists outputs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Resolves an input reference to a readable local path.
    async fn resolve_input(&self, input: &InputFile) -> Result<PathBuf, ExtractionError>;

    /// Creates a new output file under `output_dir` holding exactly `content`.
    async fn write_output(
        &self,
        output_dir: &Path,
        request: OutputRequest<'_>,
        content: &[u8],
    ) -> Result<OutputFile, ExtractionError>;
}
