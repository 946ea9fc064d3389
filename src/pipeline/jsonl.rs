//! JSON lines pipeline
//!
//! Records are buffered and appended to `<dir>/<name>.jsonl` whenever the
//! buffer reaches its capacity, and once more on `stop`. Files are written
//! to `<dir>/files/`.

use crate::pipeline::{DataCell, FileCell, Pipeline, PipelineError, PipelineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Appends records of one spider run as JSON lines
pub struct JsonLinesPipeline {
    records_path: PathBuf,
    files_dir: PathBuf,
    capacity: usize,
    buffer: Mutex<Vec<DataCell>>,
    closed: AtomicBool,
}

impl JsonLinesPipeline {
    /// Creates a pipeline writing `<dir>/<name>.jsonl`
    ///
    /// # Arguments
    ///
    /// * `dir` - Output directory
    /// * `name` - File stem, usually the spider name and sub-name
    /// * `capacity` - Records buffered before a write (at least 1)
    pub fn new(dir: &Path, name: &str, capacity: usize) -> Self {
        Self {
            records_path: dir.join(format!("{}.jsonl", sanitize(name))),
            files_dir: dir.join("files"),
            capacity: capacity.max(1),
            buffer: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    fn ensure_open(&self) -> PipelineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::Closed);
        }
        Ok(())
    }

    async fn write_records(&self, records: Vec<DataCell>) -> PipelineResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut lines = String::new();
        for record in &records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.records_path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;

        debug!("Wrote {} records to {}", records.len(), self.records_path.display());
        Ok(records.len())
    }
}

/// Keeps file names to one path component
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Pipeline for JsonLinesPipeline {
    async fn start(&self) -> PipelineResult<()> {
        self.ensure_open()?;
        if let Some(parent) = self.records_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn collect_data(&self, cell: DataCell) -> PipelineResult<()> {
        self.ensure_open()?;
        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(cell);
            if buffer.len() >= self.capacity {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(records) = full {
            self.write_records(records).await?;
        }
        Ok(())
    }

    async fn collect_file(&self, cell: FileCell) -> PipelineResult<()> {
        self.ensure_open()?;
        tokio::fs::create_dir_all(&self.files_dir).await?;
        let path = self
            .files_dir
            .join(format!("{}__{}", sanitize(&cell.spider), sanitize(&cell.name)));
        tokio::fs::write(&path, &cell.bytes).await?;
        debug!("Wrote file {}", path.display());
        Ok(())
    }

    async fn stop(&self) -> PipelineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let records = std::mem::take(&mut *self.buffer.lock());
        let written = self.write_records(records).await?;
        info!("Pipeline closed: {} ({} records in last batch)", self.records_path.display(), written);
        Ok(())
    }
}
