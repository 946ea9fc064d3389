//! Crawler module for running spiders
//!
//! This module contains the execution side of the engine, including:
//! - HTTP downloading
//! - Crawl units that drive one spider run each
//! - The pool that hands crawl units out
//! - The engine tying a batch of spiders together

mod coordinator;
mod fetcher;
mod pool;
mod unit;

pub use coordinator::{configured_spiders, history_report, Engine, HistoryCount, RunSummary};
pub use fetcher::{build_http_client, Downloader, FetchResult, HttpDownloader, Page};
pub use pool::CrawlerPool;
pub use unit::{panic_message, CrawlUnit};
