//! Extraction task handler.
//!
//! This module provides the [`ExtractionHandler`] that executes one task:
//! each input is resolved, run through the extraction tool and emitted as a
//! new output file, strictly in descriptor order. It provides:
//! - Per-input failure isolation (one bad file never aborts the others)
//! - A bounded wait on every tool run
//! - Cooperative cancellation that kills the in-flight process
//! - Structured logging via `tracing`

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::{ToolConfig, WorkerConfig};
use crate::extract::command::{base_command_line, ExtractionCommand};
use crate::extract::runner::{CancelSignal, ProcessRunner, ToolVerdict};
use crate::model::{
    InputFailure, InputFile, OutputFile, OutputFormat, TaskDescriptor, TaskMeta, TaskResult,
    ToolWarning,
};
use crate::traits::{ExtractionError, OutputRequest, Storage, TaskError};

// ============================================================================
// Handler Types
// ============================================================================

/// Lifecycle of a single input within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Pending,
    Resolving,
    Executing,
    Succeeded,
    Failed,
}

/// Output of one successfully processed input.
#[derive(Debug)]
struct Extracted {
    output: OutputFile,

    /// Diagnostics the tool printed while still producing output
    warning: Option<ToolWarning>,
}

/// Runs the extraction tool over every input of a task.
///
/// Inputs are processed sequentially; there is no shared mutable state, so a
/// single handler can serve many concurrent tasks through `&self`.
///
/// # Example
///
/// ```ignore
/// use exif_worker::{CancelSignal, ExtractionHandler, LocalStorage, TokioProcessRunner};
/// use std::time::Duration;
///
/// let handler = ExtractionHandler::new(TokioProcessRunner, LocalStorage)
///     .with_timeout(Duration::from_secs(60));
///
/// let result = handler.handle(&task, &CancelSignal::never()).await?;
/// println!("{}", result.summary);
/// ```
pub struct ExtractionHandler<R, S>
where
    R: ProcessRunner,
    S: Storage,
{
    runner: R,

    storage: S,

    tool: ToolConfig,

    /// Limit on each tool run (default: 5 minutes)
    timeout: Duration,
}

impl<R, S> ExtractionHandler<R, S>
where
    R: ProcessRunner,
    S: Storage,
{
    /// Creates a handler with the default ExifTool invocation and a
    /// 5 minute limit per input.
    pub fn new(runner: R, storage: S) -> Self {
        Self {
            runner,
            storage,
            tool: ToolConfig::default(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_config(runner: R, storage: S, config: &WorkerConfig) -> Self {
        Self::new(runner, storage)
            .with_tool(config.tool.clone())
            .with_timeout(config.timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tool = tool;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Executes the task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::EmptyTask`] if there is nothing to process; no process
    ///   is spawned in that case
    /// - [`TaskError::TotalFailure`] if every input failed
    /// - [`TaskError::Cancelled`] if `cancel` fired; outputs already written
    ///   stay in place
    #[instrument(skip(self, task, cancel), fields(task_id = %task.task_id))]
    pub async fn handle(
        &self,
        task: &TaskDescriptor,
        cancel: &CancelSignal,
    ) -> Result<TaskResult, TaskError> {
        let inputs = task.effective_inputs();
        if inputs.is_empty() {
            warn!("Rejecting task without input files");
            return Err(TaskError::EmptyTask);
        }

        let format = task.config().output_format();
        let command = {
            let mut flags = self.tool.baseline_flags.clone();
            flags.push(self.tool.format_flag(format).to_string());
            base_command_line(&self.tool.binary, &flags)
        };

        info!(inputs = inputs.len(), ?format, %command, "Starting extraction task");
        let start = Instant::now();

        let mut outputs = Vec::with_capacity(inputs.len());
        let mut command_log = Vec::with_capacity(inputs.len());
        let mut meta = TaskMeta::default();

        for (index, input) in inputs.iter().enumerate() {
            let display_name = input.display_name();
            debug!(index, input = %display_name, state = ?InputState::Pending);

            if cancel.is_cancelled() {
                return Err(cancelled(index, outputs.len()));
            }

            match self
                .process_input(task, index, input, format, cancel, &mut command_log)
                .await
            {
                Ok(extracted) => {
                    info!(
                        index,
                        input = %display_name,
                        state = ?InputState::Succeeded,
                        output = %extracted.output.path.display(),
                        "Input extracted"
                    );
                    if let Some(warning) = extracted.warning {
                        command_log.push(format!(
                            "WARNING {} (exit code {}): {}",
                            warning.display_name,
                            warning
                                .exit_code
                                .map_or_else(|| "none".to_string(), |c| c.to_string()),
                            warning.stderr
                        ));
                        meta.warnings.push(warning);
                    }
                    outputs.push(extracted.output);
                }
                Err(ExtractionError::Cancelled) => {
                    return Err(cancelled(index, outputs.len()));
                }
                Err(error) => {
                    let kind = error.kind();
                    warn!(
                        index,
                        input = %display_name,
                        state = ?InputState::Failed,
                        kind = kind.as_str(),
                        %error,
                        "Input failed"
                    );
                    command_log.push(format!(
                        "FAILED {} [{}]: {}",
                        display_name,
                        kind.as_str(),
                        error
                    ));
                    meta.failures.push(InputFailure {
                        display_name,
                        path: input.path.clone(),
                        kind,
                        message: error.to_string(),
                    });
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        if outputs.is_empty() {
            warn!(duration_ms, failed = meta.failures.len(), "Every input failed");
            return Err(TaskError::TotalFailure {
                failures: meta.failures,
            });
        }

        let mut summary = format!("Extracted metadata from {} file(s)", outputs.len());
        if !meta.failures.is_empty() {
            summary.push_str(&format!("; {} failed", meta.failures.len()));
        }

        info!(
            duration_ms,
            succeeded = outputs.len(),
            failed = meta.failures.len(),
            "Extraction task completed"
        );

        Ok(TaskResult {
            workflow_id: task.workflow_id.clone(),
            outputs,
            summary,
            command,
            command_log,
            meta,
        })
    }

    /// Resolve → build command → execute → classify → emit, for one input.
    ///
    /// The exact command line is pushed to `command_log` before the tool
    /// runs, so failed attempts are recorded too.
    async fn process_input(
        &self,
        task: &TaskDescriptor,
        index: usize,
        input: &InputFile,
        format: OutputFormat,
        cancel: &CancelSignal,
        command_log: &mut Vec<String>,
    ) -> Result<Extracted, ExtractionError> {
        let display_name = input.display_name();

        debug!(index, input = %display_name, state = ?InputState::Resolving);
        let path: PathBuf = self.storage.resolve_input(input).await?;

        let command = ExtractionCommand::build(&self.tool, format, &path);
        let command_line = command.command_line();
        command_log.push(command_line.clone());

        debug!(index, input = %display_name, state = ?InputState::Executing, command = %command_line);
        let started = Instant::now();
        let output = self.runner.run(&command, self.timeout, cancel).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let stderr = output.stderr_text();

        let warning = match output.verdict() {
            ToolVerdict::HardFailure => {
                return Err(ExtractionError::HardFailure {
                    exit_code: output.exit_code,
                    stderr,
                });
            }
            ToolVerdict::SoftFailure => {
                warn!(
                    index,
                    input = %display_name,
                    exit_code = ?output.exit_code,
                    duration_ms,
                    "Tool exited non-zero but produced output"
                );
                Some(stderr)
            }
            ToolVerdict::Success => {
                debug!(index, input = %display_name, duration_ms, "Tool finished");
                (!stderr.is_empty()).then_some(stderr)
            }
        };

        let output_file = self
            .storage
            .write_output(
                &task.output_path,
                OutputRequest {
                    task_id: &task.task_id,
                    index,
                    input,
                    format,
                },
                &output.stdout,
            )
            .await?;

        Ok(Extracted {
            output: output_file,
            warning: warning.map(|stderr| ToolWarning {
                display_name,
                exit_code: output.exit_code,
                stderr,
            }),
        })
    }
}

/// `index` inputs were finished (succeeded or failed) before the cancel.
fn cancelled(index: usize, succeeded: usize) -> TaskError {
    info!(completed = index, succeeded, "Extraction task cancelled");
    TaskError::Cancelled { completed: index }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::mock::MockRunner;
    use crate::extract::runner::cancel_pair;
    use crate::model::{FailureKind, TaskConfig};
    use crate::storage::LocalStorage;
    use std::path::Path;
    use tempfile::TempDir;

    fn handler() -> ExtractionHandler<MockRunner, LocalStorage> {
        ExtractionHandler::new(MockRunner::new(), LocalStorage)
    }

    fn image(dir: &TempDir, name: &str) -> InputFile {
        let path = dir.path().join(name);
        std::fs::write(&path, b"\xFF\xD8\xFF\xE1fake-jpeg").unwrap();
        InputFile::new(path).with_display_name(name)
    }

    fn task(dir: &TempDir, inputs: Vec<InputFile>, json_output: Option<bool>) -> TaskDescriptor {
        TaskDescriptor {
            task_id: "task-1".to_string(),
            workflow_id: Some("wf-1".to_string()),
            input_files: inputs,
            pipe_result: None,
            output_path: dir.path().join("out"),
            task_config: json_output.map(|json_output| TaskConfig { json_output }),
        }
    }

    #[tokio::test]
    async fn test_single_jpeg_plain_output() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler
            .runner()
            .enqueue(0, "[EXIF] Make : TestCameraCorp\n[EXIF] ISO : 400\n", "");

        let task = task(&dir, vec![image(&dir, "test_image_with_exif.jpg")], None);
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.summary, "Extracted metadata from 1 file(s)");
        assert_eq!(result.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(result.outputs.len(), 1);

        let output = &result.outputs[0];
        assert_eq!(output.extension, "txt");
        assert_eq!(output.mime_type, "text/plain");
        assert_eq!(output.data_source, "exif-worker");
        assert_eq!(output.display_name, "test_image_with_exif.jpg.txt");
        let content = output.read_content().await.unwrap();
        assert!(!content.is_empty());
        assert!(String::from_utf8(content).unwrap().contains("TestCameraCorp"));

        assert_eq!(result.command, "exiftool -m -q -G");
        let expected_line = format!(
            "exiftool -m -q -G {}",
            dir.path().join("test_image_with_exif.jpg").display()
        );
        assert_eq!(result.command_log, vec![expected_line]);
        assert!(result.meta.failures.is_empty());
    }

    #[tokio::test]
    async fn test_json_output_type() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler.runner().enqueue(0, r#"[{"Make": "A"}]"#, "");
        handler.runner().enqueue(0, r#"[{"Make": "B"}]"#, "");

        let task = task(&dir, vec![image(&dir, "a.jpg"), image(&dir, "b.png")], Some(true));
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.outputs.len(), 2);
        for output in &result.outputs {
            assert_eq!(output.extension, "json");
            assert_eq!(output.mime_type, "application/json");
            assert!(output.path.extension().is_some_and(|e| e == "json"));
        }
        assert_eq!(result.command, "exiftool -m -q -json");

        let calls = handler.runner().calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.flags.last().unwrap() == "-json"));
    }

    #[tokio::test]
    async fn test_outputs_follow_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        let inputs = vec![image(&dir, "1.jpg"), image(&dir, "2.jpg"), image(&dir, "3.jpg")];
        for name in ["one", "two", "three"] {
            handler.runner().enqueue(0, name, "");
        }

        let task = task(&dir, inputs.clone(), Some(false));
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        let originals: Vec<_> = result
            .outputs
            .iter()
            .map(|o| o.original_path.clone().unwrap())
            .collect();
        let expected: Vec<_> = inputs.iter().map(|i| i.path.clone()).collect();
        assert_eq!(originals, expected);
        assert_eq!(result.outputs[2].read_content().await.unwrap(), b"three");
    }

    #[tokio::test]
    async fn test_empty_task_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();

        let err = handler
            .handle(&task(&dir, vec![], None), &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::EmptyTask));
        assert_eq!(handler.runner().call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_sole_input_is_total_failure() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        let missing = InputFile::new(dir.path().join("gone.jpg"));

        let err = handler
            .handle(&task(&dir, vec![missing], None), &CancelSignal::never())
            .await
            .unwrap_err();

        match err {
            TaskError::TotalFailure { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].kind, FailureKind::InputUnavailable);
                assert_eq!(failures[0].display_name, "gone.jpg");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handler.runner().call_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_input_does_not_fail_task() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler.runner().enqueue(0, "File Type : JPEG", "");
        handler
            .runner()
            .enqueue(1, "", "Error: File format error - corrupt.jpg");

        let task = task(&dir, vec![image(&dir, "good.jpg"), image(&dir, "corrupt.jpg")], None);
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].display_name, "good.jpg.txt");
        assert_eq!(
            result.summary,
            "Extracted metadata from 1 file(s); 1 failed"
        );

        assert_eq!(result.meta.failures.len(), 1);
        let failure = &result.meta.failures[0];
        assert_eq!(failure.kind, FailureKind::ToolHardFailure);
        assert!(failure.message.contains("File format error"));

        // Both attempts are logged, then the failure annotation.
        assert_eq!(result.command_log.len(), 3);
        assert!(result.command_log[2].starts_with("FAILED corrupt.jpg [tool_hard_failure]"));

        // Nothing was written for the corrupt input.
        let written = std::fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_soft_failure_keeps_output_and_warning() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler
            .runner()
            .enqueue(1, "Make : Canon", "Warning: [minor] Bad MakerNotes directory");

        let task = task(&dir, vec![image(&dir, "canon.jpg")], None);
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].read_content().await.unwrap(), b"Make : Canon");
        assert_eq!(result.meta.warnings.len(), 1);
        assert_eq!(result.meta.warnings[0].exit_code, Some(1));
        assert_eq!(
            result.command_log.last().unwrap(),
            "WARNING canon.jpg (exit code 1): Warning: [minor] Bad MakerNotes directory"
        );
    }

    #[tokio::test]
    async fn test_timeout_recorded_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler.runner().enqueue_error(ExtractionError::Timeout {
            limit: Duration::from_secs(1),
        });
        handler.runner().enqueue(0, "ok", "");

        let task = task(&dir, vec![image(&dir, "slow.jpg"), image(&dir, "fast.jpg")], None);
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].display_name, "fast.jpg.txt");
        assert_eq!(result.meta.failures[0].kind, FailureKind::ToolExecutionTimeout);
        assert_eq!(result.meta.failures[0].display_name, "slow.jpg");
    }

    #[tokio::test]
    async fn test_identical_content_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler.runner().enqueue(0, "Make : Nikon", "");
        handler.runner().enqueue(0, "Make : Nikon", "");

        let input = image(&dir, "nikon.jpg");
        let mut first_task = task(&dir, vec![input.clone()], None);
        first_task.task_id = "run-a".to_string();
        let mut second_task = task(&dir, vec![input], None);
        second_task.task_id = "run-b".to_string();

        let first = handler.handle(&first_task, &CancelSignal::never()).await.unwrap();
        let second = handler.handle(&second_task, &CancelSignal::never()).await.unwrap();

        assert_ne!(first.outputs[0].path, second.outputs[0].path);
        assert_eq!(
            first.outputs[0].read_content().await.unwrap(),
            second.outputs[0].read_content().await.unwrap()
        );
        assert_eq!(first.command_log, second.command_log);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        let (cancel, signal) = cancel_pair();
        cancel.cancel();

        let err = handler
            .handle(&task(&dir, vec![image(&dir, "a.jpg")], None), &signal)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Cancelled { completed: 0 }));
        assert_eq!(handler.runner().call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_counts_failed_inputs_as_completed() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler.runner().enqueue(0, "Make : A", "");
        handler.runner().enqueue_error(ExtractionError::Cancelled);

        let inputs = vec![
            InputFile::new(dir.path().join("gone.jpg")),
            image(&dir, "a.jpg"),
            image(&dir, "b.jpg"),
        ];
        let err = handler
            .handle(&task(&dir, inputs, None), &CancelSignal::never())
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Cancelled { completed: 2 }));
        // The output written before the cancel stays in place.
        assert!(dir.path().join("out").join("task-1-001.txt").exists());
    }

    #[tokio::test]
    async fn test_stderr_on_success_kept_as_warning() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        handler
            .runner()
            .enqueue(0, "Make : X", "Warning: [minor] Unrecognized MakerNotes");

        let task = task(&dir, vec![image(&dir, "x.jpg")], None);
        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();

        assert_eq!(result.summary, "Extracted metadata from 1 file(s)");
        assert_eq!(result.outputs[0].read_content().await.unwrap(), b"Make : X");
        assert_eq!(
            result.meta.warnings,
            vec![ToolWarning {
                display_name: "x.jpg".to_string(),
                exit_code: Some(0),
                stderr: "Warning: [minor] Unrecognized MakerNotes".to_string(),
            }]
        );
        assert_eq!(result.command_log.len(), 2);
        assert_eq!(
            result.command_log[1],
            "WARNING x.jpg (exit code 0): Warning: [minor] Unrecognized MakerNotes"
        );
    }

    #[tokio::test]
    async fn test_pipe_result_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler();
        let upstream = LocalStorage
            .write_output(
                &dir.path().join("upstream"),
                OutputRequest {
                    task_id: "prev",
                    index: 0,
                    input: &InputFile::new("/evidence/disk.img").with_display_name("photo.jpg"),
                    format: OutputFormat::Plain,
                },
                b"\xFF\xD8\xFF",
            )
            .await
            .unwrap();

        let mut task = task(&dir, vec![], None);
        task.pipe_result = Some(TaskResult {
            outputs: vec![upstream.clone()],
            ..TaskResult::default()
        });

        let result = handler.handle(&task, &CancelSignal::never()).await.unwrap();
        let calls = handler.runner().calls.lock().unwrap();
        assert_eq!(calls[0].input, upstream.path);
        assert_eq!(result.outputs[0].display_name, "photo.jpg.txt.txt");
        assert_eq!(
            result.outputs[0].original_path.as_deref(),
            Some(Path::new(&upstream.path))
        );
    }

    #[tokio::test]
    async fn test_from_config_uses_tool_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::default();
        config.tool.binary = "/usr/local/bin/exiftool".to_string();
        config.tool.baseline_flags = vec!["-m".to_string()];
        config.tool.plain_flag = "-s".to_string();

        let handler = ExtractionHandler::from_config(MockRunner::new(), LocalStorage, &config);
        let result = handler
            .handle(&task(&dir, vec![image(&dir, "a.jpg")], None), &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(result.command, "/usr/local/bin/exiftool -m -s");
    }
}
