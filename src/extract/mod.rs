//! Extraction module - runs the metadata tool over task inputs.
//!
//! - **Command**: tool invocation per input via [`ExtractionCommand`]
//! - **Runner**: bounded, cancellable child processes via [`ProcessRunner`]
//! - **Handler**: per-task orchestration via [`ExtractionHandler`]

pub mod command;
pub mod handler;
pub mod runner;

#[cfg(test)]
pub(crate) mod mock;

pub use command::{base_command_line, ExtractionCommand};
pub use handler::{ExtractionHandler, InputState};
pub use runner::{
    cancel_pair, CancelHandle, CancelSignal, ProcessRunner, TokioProcessRunner, ToolOutput,
    ToolVerdict,
};
