use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::command::ExtractionCommand;
use super::runner::{CancelSignal, ProcessRunner, ToolOutput};
use crate::traits::ExtractionError;

/// Test runner that replays queued results and records every command.
#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<VecDeque<Result<ToolOutput, ExtractionError>>>,
    pub calls: Mutex<Vec<ExtractionCommand>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a finished run.
    pub fn enqueue(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().push_back(Ok(ToolOutput {
            exit_code: Some(exit_code),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }));
    }

    pub fn enqueue_error(&self, error: ExtractionError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(
        &self,
        command: &ExtractionCommand,
        _limit: Duration,
        cancel: &CancelSignal,
    ) -> Result<ToolOutput, ExtractionError> {
        self.calls.lock().unwrap().push(command.clone());

        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ToolOutput {
                    exit_code: Some(0),
                    stdout: b"ExifTool Version Number : 12.76".to_vec(),
                    stderr: Vec::new(),
                })
            })
    }
}
