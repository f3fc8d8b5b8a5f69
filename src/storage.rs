//! Local-filesystem implementation of the [`Storage`] seam.

use crate::model::{InputFile, OutputFile, DATA_SOURCE};
use crate::traits::{ExtractionError, OutputRequest, Storage};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Reads inputs in place and writes outputs as new files.
///
/// Output files are named `<task_id>-<index>.<ext>` and opened with
/// create-new semantics, so two tasks never share an output path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

#[async_trait]
impl Storage for LocalStorage {
    async fn resolve_input(&self, input: &InputFile) -> Result<PathBuf, ExtractionError> {
        let path = &input.path;
        let unavailable = |reason: String| ExtractionError::InputUnavailable {
            path: path.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_file() {
            return Err(unavailable("not a regular file".to_string()));
        }

        // Opening proves readability without consuming the content.
        tokio::fs::File::open(path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(path.clone())
    }

    async fn write_output(
        &self,
        output_dir: &Path,
        request: OutputRequest<'_>,
        content: &[u8],
    ) -> Result<OutputFile, ExtractionError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let extension = request.format.extension();
        let id = format!("{}-{:03}", sanitize(request.task_id), request.index);
        let path = output_dir.join(format!("{id}.{extension}"));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;

        debug!(path = %path.display(), bytes = content.len(), "Wrote output file");

        Ok(OutputFile {
            id,
            path,
            display_name: format!("{}.{}", request.input.display_name(), extension),
            extension: extension.to_string(),
            mime_type: request.format.mime_type().to_string(),
            data_source: DATA_SOURCE.to_string(),
            original_path: Some(request.input.path.clone()),
            size: content.len() as u64,
        })
    }
}

/// Keeps task ids usable as file-name stems.
fn sanitize(task_id: &str) -> String {
    let cleaned: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputFormat;

    #[tokio::test]
    async fn test_resolve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"\xFF\xD8\xFF").unwrap();

        let resolved = LocalStorage.resolve_input(&InputFile::new(&path)).await.unwrap();
        assert_eq!(resolved, path);
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = InputFile::new(dir.path().join("missing.jpg"));

        let err = LocalStorage.resolve_input(&input).await.unwrap_err();
        assert!(matches!(err, ExtractionError::InputUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_resolve_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();

        let err = LocalStorage
            .resolve_input(&InputFile::new(dir.path()))
            .await
            .unwrap_err();
        match err {
            ExtractionError::InputUnavailable { reason, .. } => {
                assert_eq!(reason, "not a regular file")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_write_output() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("outputs");
        let input = InputFile::new("/data/a.jpg").with_display_name("holiday.jpg");

        let output = LocalStorage
            .write_output(
                &out_dir,
                OutputRequest {
                    task_id: "task/42",
                    index: 0,
                    input: &input,
                    format: OutputFormat::Json,
                },
                b"[{}]",
            )
            .await
            .unwrap();

        assert_eq!(output.id, "task_42-000");
        assert_eq!(output.path, out_dir.join("task_42-000.json"));
        assert_eq!(output.display_name, "holiday.jpg.json");
        assert_eq!(output.extension, "json");
        assert_eq!(output.mime_type, "application/json");
        assert_eq!(output.data_source, "exif-worker");
        assert_eq!(output.original_path, Some(PathBuf::from("/data/a.jpg")));
        assert_eq!(output.size, 4);
        assert_eq!(output.read_content().await.unwrap(), b"[{}]");
    }

    #[tokio::test]
    async fn test_write_output_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let input = InputFile::new("/data/a.jpg");
        let request = || OutputRequest {
            task_id: "t1",
            index: 0,
            input: &input,
            format: OutputFormat::Plain,
        };

        LocalStorage
            .write_output(dir.path(), request(), b"first")
            .await
            .unwrap();
        let err = LocalStorage
            .write_output(dir.path(), request(), b"second")
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Io(_)));
        let kept = std::fs::read(dir.path().join("t1-000.txt")).unwrap();
        assert_eq!(kept, b"first");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-1_2"), "abc-1_2");
        assert_eq!(sanitize("../x"), "___x");
        assert_eq!(sanitize(""), "task");
    }
}
