use crate::extract::{CancelSignal, ExtractionHandler, ProcessRunner};
use crate::model::{TaskDescriptor, TaskResult};
use crate::traits::{Storage, TaskError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

/// Worker slot pool: bounds how many tasks run at once.
pub struct WorkerExecutor {
    semaphore: Arc<Semaphore>,
}

impl WorkerExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[instrument(skip(self, handler, task, cancel), fields(task_id = %task.task_id))]
    pub async fn execute<R, S>(
        &self,
        handler: Arc<ExtractionHandler<R, S>>,
        task: TaskDescriptor,
        cancel: CancelSignal,
    ) -> Result<TaskResult, TaskError>
    where
        R: ProcessRunner + 'static,
        S: Storage + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| TaskError::Worker(format!("Semaphore error: {}", e)))?;

        info!("Starting task");

        let result = handler.handle(&task, &cancel).await;

        info!(ok = result.is_ok(), "Finished task");
        result
    }
}
