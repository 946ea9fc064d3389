//! Sumi-Spindle: a multi-spider crawl scheduler
//!
//! This crate implements the scheduling core of a web crawler that runs many
//! independent spiders at once, sharing one global concurrency budget, never
//! re-fetching requests that already succeeded in a previous run, and retrying
//! every failed request exactly once.

pub mod config;
pub mod crawler;
pub mod history;
pub mod pipeline;
pub mod request;
pub mod scheduler;
pub mod spider;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Spindle operations
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when a stopping spider is asked for more work; crawl units
    /// treat it as a control-flow signal, never as a failure.
    #[error("Spider {0} is stopping")]
    ForcedStop(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing backend setting for output '{output}': {setting}")]
    MissingBackend { output: String, setting: String },
}

/// Result type alias for Sumi-Spindle operations
pub type Result<T> = std::result::Result<T, SpindleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlUnit, CrawlerPool, Engine};
pub use history::History;
pub use request::Request;
pub use scheduler::{Matrix, Scheduler};
pub use spider::{Spider, SpiderRun};
pub use state::Status;
