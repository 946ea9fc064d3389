//! Configuration module for Sumi-Spindle
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_spindle::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("spindle.toml")).unwrap();
//! println!("Global capacity: {}", config.scheduler.thread_num);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, HistoryConfig, OutputConfig, PoolConfig, ProxyConfig, RunMode, SchedulerConfig,
    SpiderEntry, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
