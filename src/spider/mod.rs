//! Spiders and spider runs
//!
//! A `Spider` describes what to crawl: its name, its run keyword and the
//! rules that seed and parse requests. A `SpiderRun` binds one spider to a
//! matrix of a scheduler for the duration of a crawl.

mod context;
mod seed;
mod timer;

pub use context::Context;
pub use seed::{extract_page, ExtractedPage, SeedSpider};
pub use timer::{Bell, Clock, Timer};

use crate::scheduler::{Matrix, Scheduler};
use crate::state::{RunStats, Status};
use crate::Result;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Keywords longer than this are hashed before use as a sub-name
const MAX_PLAIN_SUB_NAME: usize = 8;

/// Rule code of a spider
#[async_trait]
pub trait SpiderRules: Send + Sync {
    /// Seeds the matrix when the run starts
    async fn root(&self, ctx: &Context) -> Result<()>;

    /// Handles a downloaded page; `ctx.request().rule` names the rule
    async fn parse(&self, ctx: &Context) -> Result<()>;
}

/// A crawl definition
#[derive(Clone)]
pub struct Spider {
    pub name: String,
    pub description: String,
    /// Run keyword; separates the history of different runs of one spider
    pub keyin: String,
    /// Negative values cap admitted pages; anything else disables the cap
    pub limit: i64,
    /// Base delay between two requests
    pub pause_time: Duration,
    pub rules: Arc<dyn SpiderRules>,
}

impl Spider {
    pub fn new(name: impl Into<String>, rules: Arc<dyn SpiderRules>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            keyin: String::new(),
            limit: 0,
            pause_time: Duration::ZERO,
            rules,
        }
    }

    pub fn with_keyin(mut self, keyin: impl Into<String>) -> Self {
        self.keyin = keyin.into();
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_pause_time(mut self, pause_time: Duration) -> Self {
        self.pause_time = pause_time;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The keyword, hashed when it is too long for a table name
    pub fn sub_name(&self) -> String {
        if self.keyin.chars().count() <= MAX_PLAIN_SUB_NAME {
            return self.keyin.clone();
        }
        hex::encode(Sha256::digest(self.keyin.as_bytes()))
    }

    /// Initial page budget of the matrix
    pub fn page_budget(&self) -> i64 {
        if self.limit < 0 {
            self.limit
        } else {
            i64::MIN
        }
    }
}

impl std::fmt::Debug for Spider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spider")
            .field("name", &self.name)
            .field("keyin", &self.keyin)
            .field("limit", &self.limit)
            .field("pause_time", &self.pause_time)
            .finish_non_exhaustive()
    }
}

/// One spider bound to a matrix
pub struct SpiderRun {
    spider: Spider,
    sub_name: String,
    matrix: Arc<Matrix>,
    status: RwLock<Status>,
    stats: RunStats,
    /// Created by the first `set_timer`, closed when the run stops
    timer: Mutex<Option<Arc<Timer>>>,
}

impl SpiderRun {
    /// Registers `spider` with `scheduler`, loading its history
    pub fn new(spider: Spider, scheduler: &Arc<Scheduler>) -> Arc<Self> {
        let sub_name = spider.sub_name();
        let matrix = scheduler.add_matrix(&spider.name, &sub_name, spider.page_budget());
        Arc::new(Self {
            spider,
            sub_name,
            matrix,
            status: RwLock::new(Status::Stopped),
            stats: RunStats::new(),
            timer: Mutex::new(None),
        })
    }

    /// Runs the root rules, then marks the run as started
    ///
    /// Errors and panics in the root rules are logged; the run starts anyway
    /// so whatever was queued before the failure is crawled.
    pub async fn start(self: &Arc<Self>) {
        let ctx = Context::root(Arc::clone(self));
        let rules = Arc::clone(&self.spider.rules);

        match AssertUnwindSafe(rules.root(&ctx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(crate::SpindleError::ForcedStop(_))) => {}
            Ok(Err(e)) => warn!("[{}] Root rule failed: {}", self.name(), e),
            Err(panic) => error!(
                "[{}] Root rule panicked: {}",
                self.name(),
                crate::crawler::panic_message(panic.as_ref())
            ),
        }

        let mut status = self.status.write();
        if *status == Status::Stopped {
            *status = Status::Run;
        }
        info!("[{}] Started with {} queued requests", self.name(), self.matrix.len());
    }

    /// Asks the run to stop; queued work is abandoned
    pub fn stop(&self) {
        *self.status.write() = Status::Stop;
        self.drop_timer();
    }

    /// Marks a run whose crawl loop has ended
    pub fn finish(&self) {
        {
            let mut status = self.status.write();
            if *status != Status::Stop {
                *status = Status::Stop;
                info!("[{}] Run finished", self.spider.name);
            }
        }
        self.drop_timer();
    }

    /// Sets the clock `id` of this run's timer, see [`Timer::set`]
    ///
    /// Fails once the run is stopping.
    pub fn set_timer(&self, id: &str, clock: Clock) -> bool {
        let mut timer = self.timer.lock();
        if self.is_stopping() {
            warn!("[{}] Timer <{}> not set: run stopping", self.name(), id);
            return false;
        }
        timer.get_or_insert_with(|| Arc::new(Timer::new())).set(id, clock)
    }

    /// Sleeps on the clock `id`, see [`Timer::sleep`]
    ///
    /// Returns `false` at once when no timer was ever set.
    pub async fn run_timer(&self, id: &str) -> bool {
        let timer = self.timer.lock().clone();
        match timer {
            Some(timer) => timer.sleep(id).await,
            None => false,
        }
    }

    fn drop_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.close();
        }
    }

    /// True once the run has started and its matrix has no work left
    pub async fn can_stop(&self) -> bool {
        self.status() != Status::Stopped && self.matrix.can_stop().await
    }

    pub fn is_stopping(&self) -> bool {
        self.status().is_stopping()
    }

    pub fn status(&self) -> Status {
        *self.status.read()
    }

    pub fn name(&self) -> &str {
        &self.spider.name
    }

    pub fn sub_name(&self) -> &str {
        &self.sub_name
    }

    /// `name` or `name__sub`, used for output files
    pub fn output_name(&self) -> String {
        if self.sub_name.is_empty() {
            self.spider.name.clone()
        } else {
            format!("{}__{}", self.spider.name, self.sub_name)
        }
    }

    pub fn spider(&self) -> &Spider {
        &self.spider
    }

    pub fn rules(&self) -> &Arc<dyn SpiderRules> {
        &self.spider.rules
    }

    pub fn matrix(&self) -> &Arc<Matrix> {
        &self.matrix
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn pause_time(&self) -> Duration {
        self.spider.pause_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryConfig, SchedulerConfig};
    use crate::request::Request;
    use crate::scheduler::NoProxy;
    use crate::SpindleError;

    struct Seeds(Vec<&'static str>);

    #[async_trait]
    impl SpiderRules for Seeds {
        async fn root(&self, ctx: &Context) -> Result<()> {
            for url in &self.0 {
                ctx.add_queue(Request::new(*url)).await?;
            }
            Ok(())
        }

        async fn parse(&self, _ctx: &Context) -> Result<()> {
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl SpiderRules for Panics {
        async fn root(&self, ctx: &Context) -> Result<()> {
            ctx.add_queue(Request::new("https://example.com/")).await?;
            panic!("root exploded");
        }

        async fn parse(&self, _ctx: &Context) -> Result<()> {
            Ok(())
        }
    }

    async fn scheduler() -> Arc<Scheduler> {
        let sdl = Scheduler::new(
            &SchedulerConfig::default(),
            &HistoryConfig::default(),
            None,
            Arc::new(NoProxy),
        );
        sdl.init().await;
        sdl
    }

    #[test]
    fn test_sub_name() {
        let rules: Arc<dyn SpiderRules> = Arc::new(Seeds(vec![]));
        assert_eq!(Spider::new("a", rules.clone()).sub_name(), "");
        assert_eq!(Spider::new("a", rules.clone()).with_keyin("short").sub_name(), "short");

        let long = Spider::new("a", rules).with_keyin("a much longer keyword");
        assert_eq!(long.sub_name().len(), 64);
        assert_eq!(long.sub_name(), long.sub_name());
    }

    #[test]
    fn test_page_budget() {
        let rules: Arc<dyn SpiderRules> = Arc::new(Seeds(vec![]));
        assert_eq!(Spider::new("a", rules.clone()).page_budget(), i64::MIN);
        assert_eq!(Spider::new("a", rules.clone()).with_limit(10).page_budget(), i64::MIN);
        assert_eq!(Spider::new("a", rules).with_limit(-5).page_budget(), -5);
    }

    #[tokio::test]
    async fn test_start_seeds_matrix() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(
            Spider::new("demo", Arc::new(Seeds(vec!["https://example.com/a", "https://example.com/b"]))),
            &sdl,
        );
        assert_eq!(run.status(), Status::Stopped);
        assert!(!run.can_stop().await);

        run.start().await;

        assert_eq!(run.status(), Status::Run);
        assert_eq!(run.matrix().len(), 2);
        let pulled = run.matrix().pull().unwrap();
        assert_eq!(pulled.spider, "demo");
        assert_eq!(pulled.rule, crate::request::DEFAULT_RULE);
    }

    #[tokio::test]
    async fn test_root_panic_is_recovered() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(Spider::new("demo", Arc::new(Panics)), &sdl);

        run.start().await;

        assert_eq!(run.status(), Status::Run);
        assert_eq!(run.matrix().len(), 1);
    }

    #[tokio::test]
    async fn test_stopping_run_rejects_new_requests() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(Spider::new("demo", Arc::new(Seeds(vec![]))), &sdl);
        run.start().await;
        run.stop();

        let ctx = Context::root(Arc::clone(&run));
        let result = ctx.add_queue(Request::new("https://example.com/")).await;
        assert!(matches!(result, Err(SpindleError::ForcedStop(_))));
        assert!(run.matrix().is_empty());
    }

    #[tokio::test]
    async fn test_finish_keeps_run_stoppable() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(Spider::new("demo", Arc::new(Seeds(vec![]))), &sdl);
        run.start().await;
        run.finish();

        assert_eq!(run.status(), Status::Stop);
        assert!(run.can_stop().await);
    }

    #[tokio::test]
    async fn test_stop_wakes_timer_sleepers() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(Spider::new("demo", Arc::new(Seeds(vec![]))), &sdl);
        run.start().await;
        assert!(!run.run_timer("daily").await);

        assert!(run.set_timer("daily", Clock::Countdown(Duration::from_secs(60))));
        let sleeper = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { run.run_timer("daily").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sleeper.is_finished());

        run.stop();
        let woke = tokio::time::timeout(Duration::from_secs(1), sleeper).await.unwrap().unwrap();
        assert!(!woke);
        assert!(!run.set_timer("daily", Clock::Countdown(Duration::from_secs(1))));
    }

    #[tokio::test]
    async fn test_timer_through_context() {
        let sdl = scheduler().await;
        let run = SpiderRun::new(Spider::new("demo", Arc::new(Seeds(vec![]))), &sdl);
        run.start().await;
        let ctx = Context::root(Arc::clone(&run));

        assert!(ctx.set_timer("tick", Clock::Countdown(Duration::from_millis(10))));
        assert!(ctx.run_timer("tick").await);
        assert!(!ctx.run_timer("other").await);

        run.finish();
        assert!(!ctx.run_timer("tick").await);
    }

    #[tokio::test]
    async fn test_output_name() {
        let sdl = scheduler().await;
        let plain = SpiderRun::new(Spider::new("news", Arc::new(Seeds(vec![]))), &sdl);
        let keyed = SpiderRun::new(
            Spider::new("news", Arc::new(Seeds(vec![]))).with_keyin("kw"),
            &sdl,
        );

        assert_eq!(plain.output_name(), "news");
        assert_eq!(keyed.output_name(), "news__kw");
    }
}
