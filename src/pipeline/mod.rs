//! Output pipelines
//!
//! A pipeline receives the records and files that spider rules produce while
//! a request is executed. The crawl loop only cares whether forwarding
//! succeeded; what a pipeline does with the data is its own business.

mod jsonl;

pub use jsonl::JsonLinesPipeline;

use crate::spider::SpiderRun;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while forwarding output
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline is closed")]
    Closed,

    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// One structured record produced by a rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataCell {
    pub spider: String,
    pub rule: String,
    pub url: String,
    pub fields: Map<String, Value>,
}

impl DataCell {
    pub fn new(spider: impl Into<String>, rule: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            spider: spider.into(),
            rule: rule.into(),
            url: url.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One downloaded file produced by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct FileCell {
    pub spider: String,
    pub rule: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Sink for rule output
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Called once before the first record
    async fn start(&self) -> PipelineResult<()>;

    /// Accepts one record
    async fn collect_data(&self, cell: DataCell) -> PipelineResult<()>;

    /// Accepts one file
    async fn collect_file(&self, cell: FileCell) -> PipelineResult<()>;

    /// Writes anything buffered; later calls to `collect_*` fail
    async fn stop(&self) -> PipelineResult<()>;
}

/// Builds the pipeline of a spider run
pub type PipelineFactory = Arc<dyn Fn(&SpiderRun) -> Arc<dyn Pipeline> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_cell_serializes_flat() {
        let cell = DataCell::new("news", "root", "https://example.com/")
            .with_field("title", "Example")
            .with_field("status", 200);

        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["spider"], "news");
        assert_eq!(json["fields"]["title"], "Example");
        assert_eq!(json["fields"]["status"], 200);
    }
}
