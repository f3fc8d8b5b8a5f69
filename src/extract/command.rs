//! Extraction command construction.

use crate::config::ToolConfig;
use crate::model::OutputFormat;
use std::path::{Path, PathBuf};

/// Fully resolved invocation of the extraction tool for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCommand {
    pub program: String,

    /// Baseline flags followed by the output-format flag
    pub flags: Vec<String>,

    /// Always passed as the last positional argument
    pub input: PathBuf,
}

impl ExtractionCommand {
    pub fn build(tool: &ToolConfig, format: OutputFormat, input: &Path) -> Self {
        let mut flags = tool.baseline_flags.clone();
        flags.push(tool.format_flag(format).to_string());

        Self {
            program: tool.binary.clone(),
            flags,
            input: input.to_path_buf(),
        }
    }

    /// Command line as recorded in the audit log.
    pub fn command_line(&self) -> String {
        let mut line = base_command_line(&self.program, &self.flags);
        line.push(' ');
        line.push_str(&shell_quote(&self.input.to_string_lossy()));
        line
    }
}

/// Invocation shared by every input of a task, without the input path.
pub fn base_command_line(program: &str, flags: &[String]) -> String {
    std::iter::once(program)
        .chain(flags.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
