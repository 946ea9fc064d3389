//! Scheduling context shared by every spider run
//!
//! This module handles:
//! - The global admission slot pool bounding requests in flight
//! - The run/pause/stop state observed by every matrix
//! - Fair-share backpressure between matrices
//! - Proxy rotation and history backend selection
//!
//! A `Scheduler` is constructed explicitly and passed to whatever needs it,
//! so several engines can live in one process.

mod matrix;
mod proxy;

pub use matrix::{Matrix, SlotPermit};
pub use proxy::{NoProxy, ProxyList, ProxyManager};

use crate::config::{HistoryConfig, RunMode, SchedulerConfig};
use crate::history::History;
use crate::state::Status;
use crate::storage::Backend;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info};

/// Coordinates all matrices of one engine
pub struct Scheduler {
    /// Global number of requests allowed in flight
    capacity: usize,

    mode: RunMode,
    success_inherit: bool,
    failure_inherit: bool,
    proxy_minute: u64,

    /// History backend; `None` disables history like server mode does
    backend: Option<Backend>,

    proxy: Arc<dyn ProxyManager>,
    use_proxy: AtomicBool,

    status: watch::Sender<Status>,

    /// Replaced on every `init`, closed on `stop`
    slots: RwLock<Arc<Semaphore>>,

    matrices: Mutex<Vec<Arc<Matrix>>>,

    /// Histories by (spider, sub-name), kept across runs of this engine
    histories: Mutex<HashMap<(String, String), Arc<History>>>,
}

impl Scheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Global scheduling settings
    /// * `history` - Inheritance flags
    /// * `backend` - Where history is read from and flushed to
    /// * `proxy` - Proxy source consulted by `Matrix::pull`
    pub fn new(
        config: &SchedulerConfig,
        history: &HistoryConfig,
        backend: Option<Backend>,
        proxy: Arc<dyn ProxyManager>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(Status::Run);
        Arc::new(Self {
            capacity: config.thread_num.max(1),
            mode: config.mode,
            success_inherit: history.success_inherit,
            failure_inherit: history.failure_inherit,
            proxy_minute: config.proxy_minute,
            backend,
            proxy,
            use_proxy: AtomicBool::new(false),
            status,
            slots: RwLock::new(Arc::new(Semaphore::new(config.thread_num.max(1)))),
            matrices: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
        })
    }

    /// Prepares the scheduler for a new batch of spider runs
    ///
    /// Waits for the proxy manager, resets the matrix list and the slot pool,
    /// decides whether proxies rotate, and sets the status to `Run`.
    pub async fn init(&self) {
        self.proxy.ready().await;

        self.matrices.lock().clear();
        *self.slots.write() = Arc::new(Semaphore::new(self.capacity));

        let use_proxy = self.proxy_minute > 0 && self.proxy.count() > 0;
        if use_proxy {
            self.proxy.update_ticker(self.proxy_minute);
            info!(
                "Proxy rotation enabled: {} proxies every {} min",
                self.proxy.count(),
                self.proxy_minute
            );
        }
        self.use_proxy.store(use_proxy, Ordering::SeqCst);

        self.status.send_replace(Status::Run);
        info!("Scheduler initialized with capacity {}", self.capacity);
    }

    /// Creates and registers the matrix of one spider run
    ///
    /// Unless history is disabled, prior success and failure history is
    /// loaded first and loaded failures are handed to the matrix for retry.
    /// Backend read errors are logged and leave the history empty. With both
    /// inherit flags off the history starts empty, even in server mode.
    pub fn add_matrix(self: &Arc<Self>, spider: &str, sub_name: &str, page_budget: i64) -> Arc<Matrix> {
        let history = self.history(spider, sub_name);

        let fresh = !self.success_inherit && !self.failure_inherit;
        let failures = match self.history_backend() {
            _ if fresh => {
                history.empty();
                HashMap::new()
            }
            Some(backend) => {
                if let Err(e) = history.read_success(backend, self.success_inherit) {
                    error!("Failed to read success history of {}: {}", spider, e);
                }
                if let Err(e) = history.read_failure(backend, self.failure_inherit) {
                    error!("Failed to read failure history of {}: {}", spider, e);
                }
                history.pull_failure()
            }
            None => HashMap::new(),
        };

        let matrix = Arc::new(Matrix::new(
            spider,
            Arc::clone(self),
            history,
            page_budget,
            failures,
        ));
        self.matrices.lock().push(Arc::clone(&matrix));
        matrix
    }

    /// Toggles between `Run` and `Pause`; no effect once stopped
    pub fn pause_recover(&self) -> Status {
        self.status.send_modify(|status| *status = status.toggled());
        let status = self.status();
        info!("Scheduler status: {}", status);
        status
    }

    /// Stops admitting work
    ///
    /// Closes the slot pool and drops every registered matrix. Safe to call
    /// more than once.
    pub fn stop(&self) {
        self.status.send_replace(Status::Stop);
        self.slots.read().close();
        self.matrices.lock().clear();
        info!("Scheduler stopped");
    }

    /// Fair share of slots per matrix, at least 1
    pub fn avg_res(&self) -> usize {
        let count = self.matrix_count().max(1);
        (self.capacity / count).max(1)
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn matrix_count(&self) -> usize {
        self.matrices.lock().len()
    }

    pub fn use_proxy(&self) -> bool {
        self.use_proxy.load(Ordering::SeqCst)
    }

    pub(crate) fn proxy(&self) -> &dyn ProxyManager {
        self.proxy.as_ref()
    }

    pub(crate) fn slots(&self) -> Arc<Semaphore> {
        let slots = self.slots.read();
        Arc::clone(&*slots)
    }

    /// Backend to use for history, or `None` in server mode
    pub(crate) fn history_backend(&self) -> Option<&Backend> {
        match self.mode {
            RunMode::Server => None,
            RunMode::Offline => self.backend.as_ref(),
        }
    }

    pub(crate) fn success_inherit(&self) -> bool {
        self.success_inherit
    }

    pub(crate) fn failure_inherit(&self) -> bool {
        self.failure_inherit
    }

    /// Returns the history of (spider, sub-name), creating it on first use
    pub fn history(&self, spider: &str, sub_name: &str) -> Arc<History> {
        let mut histories = self.histories.lock();
        Arc::clone(
            histories
                .entry((spider.to_string(), sub_name.to_string()))
                .or_insert_with(|| Arc::new(History::new(spider, sub_name))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(capacity: usize) -> Arc<Scheduler> {
        let config = SchedulerConfig {
            thread_num: capacity,
            ..SchedulerConfig::default()
        };
        Scheduler::new(&config, &HistoryConfig::default(), None, Arc::new(NoProxy))
    }

    #[tokio::test]
    async fn test_init_resets_matrices() {
        let sdl = scheduler(4);
        sdl.init().await;
        sdl.add_matrix("a", "", i64::MIN);
        sdl.add_matrix("b", "", i64::MIN);
        assert_eq!(sdl.matrix_count(), 2);

        sdl.init().await;
        assert_eq!(sdl.matrix_count(), 0);
        assert_eq!(sdl.status(), Status::Run);
        assert!(!sdl.use_proxy());
    }

    #[tokio::test]
    async fn test_avg_res() {
        let sdl = scheduler(5);
        sdl.init().await;
        assert_eq!(sdl.avg_res(), 5);

        sdl.add_matrix("a", "", i64::MIN);
        sdl.add_matrix("b", "", i64::MIN);
        assert_eq!(sdl.avg_res(), 2);

        for name in ["c", "d", "e", "f"] {
            sdl.add_matrix(name, "", i64::MIN);
        }
        assert_eq!(sdl.avg_res(), 1);
    }

    #[tokio::test]
    async fn test_pause_recover() {
        let sdl = scheduler(1);
        sdl.init().await;

        assert_eq!(sdl.pause_recover(), Status::Pause);
        assert_eq!(sdl.pause_recover(), Status::Run);

        sdl.stop();
        assert_eq!(sdl.pause_recover(), Status::Stop);
    }

    #[tokio::test]
    async fn test_stop_twice_is_safe() {
        let sdl = scheduler(2);
        sdl.init().await;
        sdl.add_matrix("a", "", i64::MIN);

        sdl.stop();
        sdl.stop();

        assert_eq!(sdl.status(), Status::Stop);
        assert_eq!(sdl.matrix_count(), 0);
        assert!(sdl.slots().is_closed());
    }

    #[tokio::test]
    async fn test_proxy_rotation_enabled() {
        let config = SchedulerConfig {
            proxy_minute: 3,
            ..SchedulerConfig::default()
        };
        let proxies = Arc::new(ProxyList::new(vec!["http://127.0.0.1:3128".to_string()]));
        let sdl = Scheduler::new(&config, &HistoryConfig::default(), None, proxies);
        sdl.init().await;

        assert!(sdl.use_proxy());
    }

    #[tokio::test]
    async fn test_fresh_matrix_starts_with_empty_history() {
        let sdl = scheduler(2);
        sdl.init().await;
        let first = sdl.add_matrix("news", "", i64::MIN);
        first.history().upsert_success("k");

        // Server mode keeps history in memory between runs
        let again = sdl.add_matrix("news", "", i64::MIN);
        assert!(again.history().has_success("k"));

        let history = HistoryConfig {
            success_inherit: false,
            failure_inherit: false,
            ..HistoryConfig::default()
        };
        let fresh = Scheduler::new(&SchedulerConfig::default(), &history, None, Arc::new(NoProxy));
        fresh.init().await;
        let first = fresh.add_matrix("news", "", i64::MIN);
        first.history().upsert_success("k");

        let again = fresh.add_matrix("news", "", i64::MIN);
        assert!(!again.history().has_success("k"));
        assert_eq!(again.history().success_len(), 0);
    }

    #[test]
    fn test_history_registry_reuses_entries() {
        let sdl = scheduler(1);
        let a = sdl.history("news", "kw");
        let b = sdl.history("news", "kw");
        let c = sdl.history("news", "");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
