use crate::core::{Operation, Record, Result, WriteError, WriteSink};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Appends inserted documents to a JSON Lines file.
///
/// Each batch is flushed before `write` returns. Only inserts are
/// supported; update and delete fail as fatal.
pub struct JsonLinesSink {
    file_path: PathBuf,
    truncate: bool,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl JsonLinesSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            truncate: false,
            writer: None,
        }
    }

    /// Empty the file when it is first opened instead of appending to it.
    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    async fn ensure_writer(&mut self) -> std::io::Result<&mut BufWriter<tokio::fs::File>> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(!self.truncate)
                .truncate(self.truncate)
                .open(&self.file_path)
                .await?;
            self.writer = Some(BufWriter::new(file));
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(std::io::Error::other("writer not initialised")),
        }
    }
}

fn classify(e: std::io::Error) -> WriteError {
    match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::InvalidInput => {
            WriteError::fatal(e.to_string())
        }
        _ => WriteError::retryable(e.to_string()),
    }
}

#[async_trait]
impl WriteSink for JsonLinesSink {
    async fn write(
        &mut self,
        operation: Operation,
        batch: &[Record],
    ) -> std::result::Result<(), WriteError> {
        if operation != Operation::Insert {
            return Err(WriteError::fatal(format!(
                "operation '{operation}' is not supported by the JSON Lines sink"
            )));
        }

        let mut buf = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buf, &record.data)
                .map_err(|e| WriteError::fatal(e.to_string()))?;
            buf.push(b'\n');
        }

        let writer = self.ensure_writer().await.map_err(classify)?;
        let written = match writer.write_all(&buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Drop buffered bytes so a retry does not write them a second time.
            self.writer = None;
            return Err(classify(e));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }
}
