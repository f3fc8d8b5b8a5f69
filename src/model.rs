//! Task, input, output and result types exchanged with the task queue.
//!
//! Everything here is plain data with serde derives so the queue
//! collaborator can ship it as JSON.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name used to register and route the task to the worker queue.
pub const TASK_NAME: &str = "exif-worker.tasks.extract_exif";

/// Data-source marker stamped on every produced output file.
pub const DATA_SOURCE: &str = "exif-worker";

// ============================================================================
// Task Input
// ============================================================================

/// One unit of work dispatched to the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique id of this task invocation; also prefixes output file names
    pub task_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default)]
    pub input_files: Vec<InputFile>,

    /// Result of the previous task in the pipeline, if any.
    ///
    /// When present its outputs take precedence over `input_files`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe_result: Option<TaskResult>,

    /// Directory new output files are written into
    pub output_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_config: Option<TaskConfig>,
}

impl TaskDescriptor {
    /// Returns the inputs this task should process, in order.
    pub fn effective_inputs(&self) -> Vec<InputFile> {
        match &self.pipe_result {
            Some(previous) => previous.outputs.iter().map(InputFile::from).collect(),
            None => self.input_files.clone(),
        }
    }

    /// Task configuration with defaults applied.
    pub fn config(&self) -> TaskConfig {
        self.task_config.unwrap_or_default()
    }
}

/// Reference to a source file owned by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Declared media type, e.g. `"image/jpeg"`
    #[serde(default, alias = "data_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            path: path.into(),
            display_name: None,
            mime_type: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name, falling back to the file name of `path`.
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
        }
    }
}

impl From<&OutputFile> for InputFile {
    fn from(output: &OutputFile) -> Self {
        Self {
            id: Some(output.id.clone()),
            path: output.path.clone(),
            display_name: Some(output.display_name.clone()),
            mime_type: Some(output.mime_type.clone()),
        }
    }
}

// ============================================================================
// Task Configuration
// ============================================================================

/// User-supplied options for one task.
///
/// Unknown keys are rejected so a typo in the UI form cannot silently fall
/// back to the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// Ask the extractor for structured JSON instead of plain text
    pub json_output: bool,
}

impl TaskConfig {
    pub fn output_format(&self) -> OutputFormat {
        if self.json_output {
            OutputFormat::Json
        } else {
            OutputFormat::Plain
        }
    }
}

/// Output mode of the extractor, which also fixes the artifact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Json,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Plain => "txt",
            OutputFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Plain => "text/plain",
            OutputFormat::Json => "application/json",
        }
    }
}

// ============================================================================
// Task Output
// ============================================================================

/// Artifact holding the captured extractor output for one input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub id: String,

    /// Where the captured bytes were written
    pub path: PathBuf,

    /// Input display name with the output extension appended
    pub display_name: String,

    pub extension: String,

    #[serde(alias = "data_type")]
    pub mime_type: String,

    pub data_source: String,

    /// Path of the input this artifact was produced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<PathBuf>,

    /// Size of the content in bytes
    #[serde(default)]
    pub size: u64,
}

impl OutputFile {
    /// Reads the artifact content back from storage.
    pub async fn read_content(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// Value returned to the queue collaborator for a task that ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    pub outputs: Vec<OutputFile>,

    pub summary: String,

    /// Base invocation shared by every input, without the input path
    #[serde(default)]
    pub command: String,

    /// Exact command lines used, with failure and warning annotations
    #[serde(default)]
    pub command_log: Vec<String>,

    #[serde(default)]
    pub meta: TaskMeta,
}

/// Structured detail about what went wrong (or nearly wrong) in a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<InputFailure>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ToolWarning>,
}

/// A per-input fatal condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFailure {
    pub display_name: String,
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

/// Classification of per-input failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputUnavailable,
    ToolUnavailable,
    ToolExecutionTimeout,
    ToolHardFailure,
    Cancelled,
    Io,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputUnavailable => "input_unavailable",
            FailureKind::ToolUnavailable => "tool_unavailable",
            FailureKind::ToolExecutionTimeout => "tool_execution_timeout",
            FailureKind::ToolHardFailure => "tool_hard_failure",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Io => "io",
        }
    }
}

/// Diagnostic output kept from a run that still produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolWarning {
    pub display_name: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

// ============================================================================
// Registration Metadata
// ============================================================================

/// Description of the task advertised to the queue and UI.
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub task_config: Vec<ConfigOption>,
}

/// One field of the task configuration form.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOption {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    pub default_value: bool,
}

impl TaskMetadata {
    pub fn describe() -> Self {
        Self {
            name: TASK_NAME,
            display_name: "ExifTool Extractor",
            description: "Extracts EXIF metadata from files using ExifTool.",
            task_config: vec![ConfigOption {
                name: "json_output",
                label: "Output in JSON format",
                description: "If checked, ExifTool will output metadata in JSON format. \
                              Output files will have a .json extension and \
                              'application/json' MIME type.",
                kind: "checkbox",
                required: false,
                default_value: false,
            }],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
