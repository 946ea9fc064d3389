//! Engine - wires configuration, scheduler, pool and pipelines together
//!
//! This module contains the top-level orchestration of a batch:
//! - Opening the history backend and proxy source from configuration
//! - Handing each spider a crawl unit from the pool
//! - Collecting per-spider summaries once every run has finished
//! - Reading durable history counts for reporting

use crate::config::{Config, RunMode, SpiderEntry};
use crate::crawler::fetcher::{Downloader, HttpDownloader};
use crate::crawler::pool::CrawlerPool;
use crate::history::History;
use crate::pipeline::{JsonLinesPipeline, Pipeline, PipelineFactory};
use crate::scheduler::{NoProxy, ProxyList, ProxyManager, Scheduler};
use crate::spider::{SeedSpider, Spider, SpiderRun};
use crate::state::Status;
use crate::storage::{Backend, HistoryStorage};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one spider run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub spider: String,
    pub sub_name: String,
    pub success: u64,
    pub failure: u64,
    /// Requests still queued when the run ended (non-zero only after a stop)
    pub pending: usize,
}

impl RunSummary {
    fn from_run(run: &SpiderRun) -> Self {
        Self {
            spider: run.name().to_string(),
            sub_name: run.sub_name().to_string(),
            success: run.stats().success(),
            failure: run.stats().failure(),
            pending: run.matrix().len(),
        }
    }
}

/// Durable history of one configured spider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCount {
    pub spider: String,
    pub sub_name: String,
    pub success: usize,
    pub failure: usize,
}

/// Builds the seed spiders declared in the configuration
pub fn configured_spiders(config: &Config) -> Vec<Spider> {
    config.spiders.iter().map(SeedSpider::spider).collect()
}

/// Reads the durable success and failure counts of every configured spider
///
/// # Returns
///
/// * `Ok(Vec<HistoryCount>)` - One entry per configured spider
/// * `Err(SpindleError)` - The backend could not be opened or read
pub fn history_report(config: &Config) -> Result<Vec<HistoryCount>> {
    let backend = Backend::open(&config.history)?;
    config
        .spiders
        .iter()
        .map(|entry| history_count(&backend, entry))
        .collect()
}

fn history_count(backend: &Backend, entry: &SpiderEntry) -> Result<HistoryCount> {
    let sub_name = SeedSpider::spider(entry).sub_name();
    let history = History::new(&entry.name, &sub_name);
    Ok(HistoryCount {
        spider: entry.name.clone(),
        success: backend.read_all(history.success_table())?.len(),
        failure: backend.read_all(history.failure_table())?.len(),
        sub_name,
    })
}

/// Runs batches of spiders against one scheduler and crawler pool
pub struct Engine {
    scheduler: Arc<Scheduler>,
    pool: Arc<CrawlerPool>,
    pipelines: PipelineFactory,
}

impl Engine {
    /// Creates an engine from configuration
    ///
    /// Opens the history backend (skipped in server mode), builds the HTTP
    /// downloader and writes records as JSON lines under `output.dir`.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = match config.scheduler.mode {
            RunMode::Server => None,
            RunMode::Offline => Some(Backend::open(&config.history)?),
        };

        let proxy: Arc<dyn ProxyManager> = if config.proxy.proxies.is_empty() {
            Arc::new(NoProxy)
        } else {
            Arc::new(ProxyList::new(config.proxy.proxies.clone()))
        };

        let downloader = Arc::new(HttpDownloader::new(&config.user_agent)?);

        let dir = PathBuf::from(&config.output.dir);
        let capacity = config.output.docker_cap;
        let pipelines: PipelineFactory = Arc::new(move |run: &SpiderRun| {
            Arc::new(JsonLinesPipeline::new(&dir, &run.output_name(), capacity)) as Arc<dyn Pipeline>
        });

        Ok(Self::with_parts(config, backend, proxy, downloader, pipelines))
    }

    /// Creates an engine from explicit collaborators
    pub fn with_parts(
        config: &Config,
        backend: Option<Backend>,
        proxy: Arc<dyn ProxyManager>,
        downloader: Arc<dyn Downloader>,
        pipelines: PipelineFactory,
    ) -> Self {
        let scheduler = Scheduler::new(&config.scheduler, &config.history, backend, proxy);
        let pool = Arc::new(CrawlerPool::new(
            config.pool.max_crawlers,
            downloader,
            Duration::from_secs(config.history.flush_interval_secs),
        ));
        Self {
            scheduler,
            pool,
            pipelines,
        }
    }

    /// Crawls every spider to completion
    ///
    /// Spiders beyond the pool capacity wait for a unit to come free. The
    /// summaries are returned in the order the spiders were given.
    pub async fn run(&self, spiders: Vec<Spider>) -> Vec<RunSummary> {
        if spiders.is_empty() {
            tracing::warn!("No spiders to run");
            return Vec::new();
        }

        let start_time = Instant::now();
        self.scheduler.init().await;
        let capacity = self.pool.reset(spiders.len());
        tracing::info!(
            "Starting {} spiders on {} crawl units",
            spiders.len(),
            capacity
        );

        let mut handles = Vec::with_capacity(spiders.len());
        for spider in spiders {
            let Some(unit) = self.pool.use_unit().await else {
                tracing::warn!("Crawler pool stopped; {} not started", spider.name);
                break;
            };

            let run = SpiderRun::new(spider, &self.scheduler);
            unit.init(Arc::clone(&run), (self.pipelines)(&*run));

            let pool = Arc::clone(&self.pool);
            handles.push(tokio::spawn(async move {
                unit.run().await;
                pool.free(unit).await;
                RunSummary::from_run(&run)
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::error!("Crawl unit task failed: {}", e),
            }
        }

        let succeeded: u64 = summaries.iter().map(|s| s.success).sum();
        let failed: u64 = summaries.iter().map(|s| s.failure).sum();
        tracing::info!(
            "Batch finished in {:.1}s: {} succeeded, {} failed",
            start_time.elapsed().as_secs_f64(),
            succeeded,
            failed
        );
        summaries
    }

    /// Toggles between running and paused
    pub fn pause_recover(&self) -> Status {
        self.scheduler.pause_recover()
    }

    /// Stops the scheduler and every running spider
    pub fn stop(&self) {
        tracing::info!("Stopping engine");
        self.scheduler.stop();
        self.pool.stop();
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &CrawlerPool {
        &self.pool
    }
}
