//! Crawl units
//!
//! A crawl unit drives one spider run: it pulls requests from the run's
//! matrix, executes each one in its own task under a global slot, and
//! flushes history when the run ends.

use crate::crawler::fetcher::Downloader;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::scheduler::SlotPermit;
use crate::spider::{Context, SpiderRun};
use crate::{Result, SpindleError};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long an idle unit waits for new work before checking again
const IDLE_BACKOFF: Duration = Duration::from_millis(200);

/// How long a stopped run waits for in-flight requests before the last flush
const STOP_DRAIN: Duration = Duration::from_secs(30);

/// Renders a panic payload for logging
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Random delay around `base`: `base/2 + [0, base*1.5)`
fn jittered_pause(base: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let millis = base.as_millis() as u64;
    let spread = (millis * 3 / 2).max(1);
    Duration::from_millis(millis / 2 + rand::thread_rng().gen_range(0..spread))
}

#[derive(Clone)]
struct Binding {
    run: Arc<SpiderRun>,
    pipeline: Arc<dyn Pipeline>,
}

/// Reusable executor for one spider run at a time
pub struct CrawlUnit {
    id: usize,
    downloader: Arc<dyn Downloader>,
    flush_interval: Duration,
    binding: Mutex<Option<Binding>>,
}

enum Outcome {
    Done,
    Failed(SpindleError),
    Stopped,
}

impl CrawlUnit {
    pub fn new(id: usize, downloader: Arc<dyn Downloader>, flush_interval: Duration) -> Self {
        Self {
            id,
            downloader,
            flush_interval,
            binding: Mutex::new(None),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Binds the unit to a spider run and its pipeline
    pub fn init(&self, run: Arc<SpiderRun>, pipeline: Arc<dyn Pipeline>) {
        debug!("Crawl unit {} bound to {}", self.id, run.name());
        *self.binding.lock() = Some(Binding { run, pipeline });
    }

    pub fn run_handle(&self) -> Option<Arc<SpiderRun>> {
        self.binding.lock().as_ref().map(|b| Arc::clone(&b.run))
    }

    /// Stops the bound spider run, if any
    pub fn stop(&self) {
        if let Some(run) = self.run_handle() {
            run.stop();
        }
    }

    /// True when the unit is unbound or its run has no work left
    pub async fn can_stop(&self) -> bool {
        match self.run_handle() {
            Some(run) => run.can_stop().await,
            None => true,
        }
    }

    /// Crawls the bound spider run to completion
    pub async fn run(&self) {
        let binding = self.binding.lock().clone();
        let Some(Binding { run, pipeline }) = binding else {
            warn!("Crawl unit {} started without a spider run", self.id);
            return;
        };

        if let Err(e) = pipeline.start().await {
            error!("[{}] Pipeline failed to start: {}", run.name(), e);
            return;
        }

        run.start().await;
        self.crawl(&run, &pipeline).await;

        let matrix = run.matrix();
        matrix.wait().await;
        if tokio::time::timeout(STOP_DRAIN, matrix.drain()).await.is_err() {
            warn!(
                "[{}] {} requests still in flight at the final flush",
                run.name(),
                matrix.resource_count()
            );
        }
        matrix.try_flush_success();
        matrix.try_flush_failure();

        if let Err(e) = pipeline.stop().await {
            error!("[{}] Pipeline failed to stop: {}", run.name(), e);
        }
        run.finish();

        info!(
            "[{}] Finished: {} succeeded, {} failed",
            run.name(),
            run.stats().success(),
            run.stats().failure()
        );
    }

    async fn crawl(&self, run: &Arc<SpiderRun>, pipeline: &Arc<dyn Pipeline>) {
        let matrix = run.matrix();
        let mut last_flush = Instant::now();

        loop {
            if run.is_stopping() || !matrix.wait_for_share().await {
                break;
            }

            let Some(req) = matrix.pull() else {
                if run.can_stop().await {
                    break;
                }
                let _ = tokio::time::timeout(IDLE_BACKOFF, matrix.activity()).await;
                continue;
            };

            let Some(permit) = matrix.use_slot().await else {
                break;
            };

            let task_run = Arc::clone(run);
            let task_pipeline = Arc::clone(pipeline);
            let downloader = Arc::clone(&self.downloader);
            tokio::spawn(async move {
                process(task_run, task_pipeline, downloader, req, permit).await;
            });

            let pause = jittered_pause(run.pause_time());
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            if last_flush.elapsed() >= self.flush_interval {
                matrix.try_flush_success();
                last_flush = Instant::now();
            }
        }
    }
}

/// Executes one request and reports its outcome
///
/// The slot permit is held until the outcome has been recorded.
async fn process(
    run: Arc<SpiderRun>,
    pipeline: Arc<dyn Pipeline>,
    downloader: Arc<dyn Downloader>,
    req: Request,
    permit: SlotPermit,
) {
    let outcome = AssertUnwindSafe(execute(&run, &pipeline, downloader.as_ref(), &req))
        .catch_unwind()
        .await;
    let matrix = run.matrix();

    match outcome {
        Ok(Outcome::Done) => {
            matrix.do_history(&req, true);
            run.stats().record_success();
        }
        Ok(Outcome::Stopped) => {}
        Ok(Outcome::Failed(e)) => {
            warn!("[{}] {} failed: {}", run.name(), req.url, e);
            if matrix.do_history(&req, false) {
                run.stats().record_failure();
            }
        }
        Err(payload) => {
            if run.is_stopping() {
                return;
            }
            error!(
                "[{}] Panic while processing {}: {}\n{}",
                run.name(),
                req.url,
                panic_message(payload.as_ref()),
                Backtrace::force_capture()
            );
            if matrix.do_history(&req, false) {
                run.stats().record_failure();
            }
        }
    }

    matrix.free(permit);
}

async fn execute(
    run: &Arc<SpiderRun>,
    pipeline: &Arc<dyn Pipeline>,
    downloader: &dyn Downloader,
    req: &Request,
) -> Outcome {
    let page = match downloader.download(run, req).await {
        Ok(page) => page,
        Err(e) => return Outcome::Failed(e),
    };

    let ctx = Context::for_page(Arc::clone(run), req.clone(), page);
    match run.rules().parse(&ctx).await {
        Ok(()) => {}
        Err(SpindleError::ForcedStop(_)) => return Outcome::Stopped,
        Err(e) => return Outcome::Failed(e),
    }

    if let Err(e) = forward(&ctx, pipeline.as_ref()).await {
        warn!("[{}] Output of {} not fully forwarded: {}", run.name(), req.url, e);
    }
    Outcome::Done
}

/// Sends files, then records, stopping at the first pipeline error
async fn forward(ctx: &Context, pipeline: &dyn Pipeline) -> Result<()> {
    for file in ctx.take_files() {
        pipeline.collect_file(file).await?;
    }
    for item in ctx.take_items() {
        pipeline.collect_data(item).await?;
    }
    Ok(())
}
