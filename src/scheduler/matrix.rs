//! Request matrix: the per-spider-run queue
//!
//! A matrix owns the pending requests of one spider run, deduplicates them
//! against history, applies fair-share backpressure and implements the
//! single automatic retry of failed requests.

use crate::history::History;
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::state::Status;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit};
use tracing::{debug, error, info, trace};

/// Wake-ups shared between a matrix and its outstanding slot permits
#[derive(Debug, Default)]
struct Signals {
    /// Requests of this matrix currently holding a global slot
    in_flight: AtomicUsize,

    /// In-flight requests of this matrix blocked in `push`
    parked: AtomicUsize,

    /// Fired whenever a slot is returned or a holder parks
    freed: Notify,

    /// Fired when work may be available to pull
    activity: Notify,
}

/// One global admission slot held by a request of a matrix
///
/// Dropping the permit frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    signals: Arc<Signals>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.signals.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.signals.freed.notify_waiters();
        self.signals.activity.notify_one();
    }
}

/// Marks a slot holder as blocked in `push` until dropped
struct Parked<'a>(&'a Signals);

impl<'a> Parked<'a> {
    fn new(signals: &'a Signals) -> Self {
        signals.parked.fetch_add(1, Ordering::SeqCst);
        signals.freed.notify_waiters();
        Self(signals)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.parked.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pending requests of one spider run, by priority
pub struct Matrix {
    spider: String,
    scheduler: Arc<Scheduler>,
    history: Arc<History>,

    /// Incremented on every admission; see `can_stop`
    page_budget: AtomicI64,

    /// Priority level -> FIFO queue
    queue: Mutex<BTreeMap<i32, VecDeque<Request>>>,

    /// Keys admitted in this run and not yet resolved
    temp_dedup: Mutex<HashSet<String>>,

    /// Failed requests by key; `None` once the one retry has been queued
    failures: Mutex<HashMap<String, Option<Request>>>,

    signals: Arc<Signals>,
}

impl Matrix {
    pub(crate) fn new(
        spider: &str,
        scheduler: Arc<Scheduler>,
        history: Arc<History>,
        page_budget: i64,
        failures: HashMap<String, Request>,
    ) -> Self {
        for req in failures.values() {
            info!("[{}] Failed request from earlier run: {}", spider, req.url);
        }
        Self {
            spider: spider.to_string(),
            scheduler,
            history,
            page_budget: AtomicI64::new(page_budget),
            queue: Mutex::new(BTreeMap::new()),
            temp_dedup: Mutex::new(HashSet::new()),
            failures: Mutex::new(failures.into_iter().map(|(k, v)| (k, Some(v))).collect()),
            signals: Arc::new(Signals::default()),
        }
    }

    pub fn spider(&self) -> &str {
        &self.spider
    }

    pub fn history(&self) -> &Arc<History> {
        &self.history
    }

    /// Admits `req` into the queue
    ///
    /// Waits while the scheduler is paused and while this matrix holds more
    /// than its fair share of global slots. Non-reloadable requests whose key
    /// already succeeded or was already admitted in this run are dropped, as
    /// is everything pushed after the scheduler stopped.
    ///
    /// # Returns
    ///
    /// `true` if the request was queued
    pub async fn push(&self, req: Request) -> bool {
        self.admit(req, false).await
    }

    /// [`Matrix::push`] for a caller that holds one of this matrix's slots
    ///
    /// While it waits, the caller's slot does not count against the fair
    /// share, so in-flight requests that all push at once cannot block each
    /// other forever.
    pub(crate) async fn push_from_slot(&self, req: Request) -> bool {
        self.admit(req, true).await
    }

    async fn admit(&self, req: Request, holds_slot: bool) -> bool {
        let mut status = self.scheduler.subscribe();
        if status.borrow_and_update().is_stopping() {
            return false;
        }

        if *status.borrow() == Status::Pause {
            match status.wait_for(|s| *s != Status::Pause).await {
                Ok(s) if !s.is_stopping() => {}
                _ => return false,
            }
        }

        let mut parked = None;
        loop {
            let freed = self.signals.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if self.active_count() <= self.scheduler.avg_res() {
                break;
            }
            if holds_slot && parked.is_none() {
                parked = Some(Parked::new(&self.signals));
                continue;
            }
            trace!("[{}] Push waiting for in-flight requests to drain", self.spider);

            tokio::select! {
                _ = &mut freed => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
            if self.scheduler.status().is_stopping() {
                return false;
            }
        }

        drop(parked);

        // Checked and recorded under one lock; see `do_history`
        if !req.reloadable {
            let key = req.unique();
            let mut admitted = self.temp_dedup.lock();
            if self.history.has_success(&key) {
                trace!("[{}] Already succeeded: {}", self.spider, req.url);
                return false;
            }
            if !admitted.insert(key) {
                trace!("[{}] Already queued: {}", self.spider, req.url);
                return false;
            }
        }

        debug!("[{}] Queued {} (priority {})", self.spider, req.url, req.priority);
        self.queue
            .lock()
            .entry(req.priority)
            .or_default()
            .push_back(req);
        self.page_budget.fetch_add(1, Ordering::SeqCst);
        self.signals.activity.notify_one();
        true
    }

    /// Takes the next request, highest priority first
    ///
    /// Returns `None` immediately when the scheduler is not running. The
    /// request's proxy is assigned here.
    pub fn pull(&self) -> Option<Request> {
        if !self.scheduler.status().is_running() {
            return None;
        }

        let mut req = {
            let mut queue = self.queue.lock();
            let (&priority, level) = queue.iter_mut().rev().find(|(_, level)| !level.is_empty())?;
            let req = level.pop_front();
            if level.is_empty() {
                queue.remove(&priority);
            }
            req?
        };

        req.proxy = if self.scheduler.use_proxy() {
            self.scheduler.proxy().get_one(&req.url)
        } else {
            None
        };
        Some(req)
    }

    /// Waits until this matrix can take one more slot within its fair share
    ///
    /// Returns `false` once the scheduler stops.
    pub async fn wait_for_share(&self) -> bool {
        let mut status = self.scheduler.subscribe();
        loop {
            let freed = self.signals.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if status.borrow_and_update().is_stopping() {
                return false;
            }
            if self.resource_count() < self.scheduler.avg_res() {
                return true;
            }

            tokio::select! {
                _ = &mut freed => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Acquires one global admission slot for this matrix
    ///
    /// Returns `None` once the slot pool has been closed by `Scheduler::stop`.
    pub async fn use_slot(&self) -> Option<SlotPermit> {
        let permit = self.scheduler.slots().acquire_owned().await.ok()?;
        self.signals.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(SlotPermit {
            _permit: permit,
            signals: Arc::clone(&self.signals),
        })
    }

    /// Returns a slot acquired with [`Matrix::use_slot`]
    pub fn free(&self, permit: SlotPermit) {
        drop(permit);
    }

    /// Reports the outcome of an executed request
    ///
    /// # Returns
    ///
    /// `true` only for the first failure of a key, meaning the request will
    /// be retried once the queue drains. A repeated failure is written to the
    /// failure history instead and `false` is returned.
    pub fn do_history(&self, req: &Request, succeeded: bool) -> bool {
        if !req.reloadable {
            let key = req.unique();
            // The success must be visible before the key leaves `temp_dedup`
            let mut admitted = self.temp_dedup.lock();
            if succeeded {
                self.history.upsert_success(&key);
            }
            admitted.remove(&key);
            if succeeded {
                return false;
            }
        }

        if succeeded {
            return false;
        }

        let key = req.unique();
        let mut failures = self.failures.lock();
        if !failures.contains_key(&key) {
            info!("[{}] Request failed, will retry: {}", self.spider, req.url);
            failures.insert(key, Some(req.clone()));
            return true;
        }

        info!("[{}] Request failed again, giving up: {}", self.spider, req.url);
        self.history.upsert_failure(req.clone());
        false
    }

    /// Decides whether the spider run has no work left
    ///
    /// A page budget that reached zero or more ends the run regardless of
    /// queued work. Otherwise the run may stop once nothing is queued or in
    /// flight and every failure has had its retry; pending retries are queued
    /// here and `false` is returned.
    pub async fn can_stop(&self) -> bool {
        if self.scheduler.status().is_stopping() {
            return true;
        }
        if self.page_budget.load(Ordering::SeqCst) >= 0 {
            return true;
        }
        if self.resource_count() != 0 || self.len() > 0 {
            return false;
        }

        let retries: Vec<Request> = self
            .failures
            .lock()
            .values_mut()
            .filter_map(Option::take)
            .collect();
        if retries.is_empty() {
            return true;
        }

        for req in retries {
            info!("[{}] Retrying failed request: {}", self.spider, req.url);
            self.push(req).await;
        }
        false
    }

    /// Requests currently queued across all priority levels
    pub fn len(&self) -> usize {
        self.queue.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests of this matrix currently holding a global slot
    pub fn resource_count(&self) -> usize {
        self.signals.in_flight.load(Ordering::SeqCst)
    }

    /// Slots held by requests that are not blocked in `push`
    fn active_count(&self) -> usize {
        let parked = self.signals.parked.load(Ordering::SeqCst);
        self.resource_count().saturating_sub(parked)
    }

    pub fn page_budget(&self) -> i64 {
        self.page_budget.load(Ordering::SeqCst)
    }

    /// Flushes success history unless in server mode or not inheriting
    ///
    /// # Returns
    ///
    /// The number of keys written
    pub fn try_flush_success(&self) -> usize {
        if !self.scheduler.success_inherit() {
            return 0;
        }
        let Some(backend) = self.scheduler.history_backend() else {
            return 0;
        };
        match self.history.flush_success(backend) {
            Ok(n) => n,
            Err(e) => {
                error!("[{}] Failed to flush success history: {}", self.spider, e);
                0
            }
        }
    }

    /// Flushes failure history unless in server mode or not inheriting
    pub fn try_flush_failure(&self) -> usize {
        if !self.scheduler.failure_inherit() {
            return 0;
        }
        let Some(backend) = self.scheduler.history_backend() else {
            return 0;
        };
        match self.history.flush_failure(backend) {
            Ok(n) => n,
            Err(e) => {
                error!("[{}] Failed to flush failure history: {}", self.spider, e);
                0
            }
        }
    }

    /// Waits until no request of this matrix is in flight or the scheduler stops
    pub async fn wait(&self) {
        self.wait_idle(true).await;
    }

    /// Waits until no request of this matrix is in flight, even after a stop
    pub async fn drain(&self) {
        self.wait_idle(false).await;
    }

    async fn wait_idle(&self, until_stop: bool) {
        let mut status = self.scheduler.subscribe();
        loop {
            let freed = self.signals.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            let stopping = status.borrow_and_update().is_stopping();
            if (until_stop && stopping) || self.resource_count() == 0 {
                return;
            }

            tokio::select! {
                _ = &mut freed => {}
                changed = status.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Resolves when work may have become available to pull
    pub async fn activity(&self) {
        self.signals.activity.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryConfig, SchedulerConfig};
    use crate::scheduler::NoProxy;
    use crate::storage::{Backend, FileHistory, HistoryStorage, SqliteHistory};
    use std::time::Duration;
    use tokio::time::timeout;

    const DISABLED: i64 = i64::MIN;

    fn scheduler_with(capacity: usize, history: HistoryConfig) -> Arc<Scheduler> {
        let config = SchedulerConfig {
            thread_num: capacity,
            ..SchedulerConfig::default()
        };
        let backend = Backend::Sqlite(SqliteHistory::new_in_memory().unwrap());
        Scheduler::new(&config, &history, Some(backend), Arc::new(NoProxy))
    }

    async fn ready(capacity: usize) -> Arc<Scheduler> {
        let sdl = scheduler_with(capacity, HistoryConfig::default());
        sdl.init().await;
        sdl
    }

    fn req(path: &str) -> Request {
        Request::new(format!("https://example.com/{}", path))
            .with_spider("demo")
            .prepare()
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_push_queues_once() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        assert!(matrix.push(req("a")).await);
        assert!(!matrix.push(req("a")).await);
        assert_eq!(matrix.len(), 1);
    }

    #[tokio::test]
    async fn test_reloadable_bypasses_dedup() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        assert!(matrix.push(req("a").reloadable(true)).await);
        assert!(matrix.push(req("a").reloadable(true)).await);
        assert_eq!(matrix.len(), 2);
    }

    #[tokio::test]
    async fn test_success_rejects_later_push() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        matrix.push(req("a")).await;
        let pulled = matrix.pull().unwrap();
        assert!(!matrix.do_history(&pulled, true));

        assert!(matrix.history().has_success(&pulled.unique()));
        assert!(!matrix.push(req("a")).await);
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_pull_order_by_priority_then_fifo() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        matrix.push(req("a").with_priority(5)).await;
        matrix.push(req("b").with_priority(5)).await;
        matrix.push(req("c").with_priority(9)).await;

        let order: Vec<String> = std::iter::from_fn(|| matrix.pull()).map(|r| r.url).collect();
        assert_eq!(
            order,
            vec![
                "https://example.com/c",
                "https://example.com/a",
                "https://example.com/b"
            ]
        );
    }

    #[tokio::test]
    async fn test_pull_only_while_running() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        matrix.push(req("a")).await;

        sdl.pause_recover();
        assert!(matrix.pull().is_none());

        sdl.pause_recover();
        let pulled = matrix.pull().unwrap();
        assert_eq!(pulled.proxy, None);
    }

    #[tokio::test]
    async fn test_push_waits_while_paused() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        sdl.pause_recover();

        let pusher = {
            let matrix = Arc::clone(&matrix);
            tokio::spawn(async move { matrix.push(req("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());

        sdl.pause_recover();
        assert!(timeout(Duration::from_secs(1), pusher).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_push_after_stop_is_dropped() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        sdl.stop();

        assert!(!matrix.push(req("a")).await);
        assert!(matrix.use_slot().await.is_none());
        assert!(matrix.can_stop().await);
    }

    #[tokio::test]
    async fn test_failure_is_retried_once_and_recorded() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        matrix.push(req("a")).await;

        // First failure: eligible for retry
        let first = matrix.pull().unwrap();
        assert!(matrix.do_history(&first, false));
        assert!(!matrix.can_stop().await);
        assert_eq!(matrix.len(), 1);

        // Second failure: exhausted and recorded
        let second = matrix.pull().unwrap();
        assert!(!matrix.do_history(&second, false));
        assert_eq!(matrix.history().failure_len(), 1);

        // Third report of the same key does not duplicate the record
        assert!(!matrix.do_history(&second, false));
        assert_eq!(matrix.history().failure_len(), 1);

        assert!(matrix.can_stop().await);
        assert_eq!(matrix.try_flush_failure(), 1);

        let backend = sdl.history_backend().unwrap();
        let records = backend.read_all(matrix.history().failure_table()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, first.unique());
    }

    #[tokio::test]
    async fn test_retry_success_leaves_no_failure() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        matrix.push(req("a")).await;

        let first = matrix.pull().unwrap();
        matrix.do_history(&first, false);
        assert!(!matrix.can_stop().await);

        let retry = matrix.pull().unwrap();
        assert!(!matrix.do_history(&retry, true));

        assert!(matrix.can_stop().await);
        assert_eq!(matrix.history().failure_len(), 0);
        assert!(matrix.history().has_success(&first.unique()));
    }

    #[tokio::test]
    async fn test_can_stop_waits_for_queue_and_in_flight() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        assert!(matrix.can_stop().await);

        matrix.push(req("a")).await;
        assert!(!matrix.can_stop().await);

        let _pulled = matrix.pull().unwrap();
        let permit = matrix.use_slot().await.unwrap();
        assert_eq!(matrix.resource_count(), 1);
        assert!(!matrix.can_stop().await);

        matrix.free(permit);
        assert_eq!(matrix.resource_count(), 0);
        assert!(matrix.can_stop().await);
    }

    #[tokio::test]
    async fn test_page_budget_stops_once_non_negative() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", -2);

        matrix.push(req("a")).await;
        assert_eq!(matrix.page_budget(), -1);
        assert!(!matrix.can_stop().await);

        // Budget reaches zero: stop even though two requests are queued
        matrix.push(req("b")).await;
        assert_eq!(matrix.page_budget(), 0);
        assert_eq!(matrix.len(), 2);
        assert!(matrix.can_stop().await);
    }

    #[tokio::test]
    async fn test_push_blocks_above_fair_share() {
        let sdl = ready(2).await;
        let a = sdl.add_matrix("a", "", DISABLED);
        let b = sdl.add_matrix("b", "", DISABLED);
        assert_eq!(sdl.avg_res(), 1);

        let first = a.use_slot().await.unwrap();
        let second = a.use_slot().await.unwrap();
        assert_eq!(a.resource_count(), 2);

        let pusher = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.push(req("x")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());
        assert!(a.is_empty());

        // The other matrix is within its share
        assert!(b.push(req("y")).await);

        a.free(first);
        assert!(timeout(Duration::from_secs(1), pusher).await.unwrap().unwrap());
        assert_eq!(a.len(), 1);
        a.free(second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_success_racing_duplicate_push_never_readmits() {
        let sdl = ready(4).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        for round in 0..2000 {
            let page = req(&format!("page{}", round));
            assert!(matrix.push(page.clone()).await);
            let pulled = matrix.pull().unwrap();

            let start = Arc::new(std::sync::Barrier::new(2));
            let pusher = {
                let matrix = Arc::clone(&matrix);
                let start = Arc::clone(&start);
                let handle = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || {
                    start.wait();
                    handle.block_on(matrix.push(page))
                })
            };
            let reporter = {
                let matrix = Arc::clone(&matrix);
                tokio::task::spawn_blocking(move || {
                    start.wait();
                    matrix.do_history(&pulled, true)
                })
            };

            assert!(!reporter.await.unwrap());
            assert!(!pusher.await.unwrap(), "round {} admitted a finished key again", round);
        }
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_slot_holders_pushing_over_share_all_finish() {
        let sdl = ready(4).await;
        let a = sdl.add_matrix("a", "", DISABLED);
        let _b = sdl.add_matrix("b", "", DISABLED);
        assert_eq!(sdl.avg_res(), 2);

        let mut tasks = Vec::new();
        for i in 0..4 {
            let permit = a.use_slot().await.unwrap();
            let a = Arc::clone(&a);
            tasks.push(tokio::spawn(async move {
                let queued = a.push_from_slot(req(&format!("link{}", i))).await;
                a.free(permit);
                queued
            }));
        }

        for task in tasks {
            assert!(timeout(Duration::from_secs(1), task).await.unwrap().unwrap());
        }
        assert_eq!(a.len(), 4);
        assert_eq!(a.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_share_holds_at_fair_share() {
        let sdl = ready(2).await;
        let a = sdl.add_matrix("a", "", DISABLED);
        let _b = sdl.add_matrix("b", "", DISABLED);

        assert!(a.wait_for_share().await);
        let held = a.use_slot().await.unwrap();

        let waiter = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.wait_for_share().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        a.free(held);
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());

        let held = a.use_slot().await.unwrap();
        sdl.stop();
        assert!(!a.wait_for_share().await);
        drop(held);
    }

    #[tokio::test]
    async fn test_drain_outlasts_stop() {
        let sdl = ready(2).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        let permit = matrix.use_slot().await.unwrap();
        sdl.stop();

        timeout(Duration::from_secs(1), matrix.wait()).await.unwrap();

        let drainer = {
            let matrix = Arc::clone(&matrix);
            tokio::spawn(async move { matrix.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!drainer.is_finished());

        drop(permit);
        timeout(Duration::from_secs(1), drainer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_use_slot_waits_for_global_capacity() {
        let sdl = ready(1).await;
        let a = sdl.add_matrix("a", "", DISABLED);
        let b = sdl.add_matrix("b", "", DISABLED);

        let held = a.use_slot().await.unwrap();

        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move { b.use_slot().await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(b.resource_count(), 0);

        a.free(held);
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_when_drained() {
        let sdl = ready(2).await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);
        let permit = matrix.use_slot().await.unwrap();

        let waiter = {
            let matrix = Arc::clone(&matrix);
            tokio::spawn(async move { matrix.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_flush_skipped_without_inherit() {
        let history = HistoryConfig {
            success_inherit: false,
            ..HistoryConfig::default()
        };
        let sdl = scheduler_with(2, history);
        sdl.init().await;
        let matrix = sdl.add_matrix("demo", "", DISABLED);

        matrix.push(req("a")).await;
        let pulled = matrix.pull().unwrap();
        matrix.do_history(&pulled, true);

        assert_eq!(matrix.try_flush_success(), 0);
        let backend = sdl.history_backend().unwrap();
        assert!(backend.read_all(matrix.history().success_table()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_from_previous_run_are_retried() {
        let dir = tempfile::TempDir::new().unwrap();
        let file_scheduler = || {
            let backend = Backend::File(FileHistory::new(dir.path()).unwrap());
            Scheduler::new(
                &SchedulerConfig::default(),
                &HistoryConfig::default(),
                Some(backend),
                Arc::new(NoProxy),
            )
        };

        let first = file_scheduler();
        first.init().await;
        let matrix = first.add_matrix("demo", "", DISABLED);
        matrix.push(req("a")).await;
        let pulled = matrix.pull().unwrap();
        matrix.do_history(&pulled, false);
        matrix.can_stop().await;
        let retry = matrix.pull().unwrap();
        matrix.do_history(&retry, false);
        assert_eq!(matrix.try_flush_failure(), 1);

        // A new process loads the failure and retries it once the queue drains
        let second = file_scheduler();
        second.init().await;
        let matrix = second.add_matrix("demo", "", DISABLED);
        assert_eq!(matrix.history().failure_len(), 0);
        assert!(!matrix.can_stop().await);
        let retried = matrix.pull().unwrap();
        assert_eq!(retried.url, "https://example.com/a");

        // It succeeds this time, so the durable failure record goes away
        assert!(!matrix.do_history(&retried, true));
        assert!(matrix.can_stop().await);
        matrix.try_flush_failure();
        let backend = second.history_backend().unwrap();
        assert!(backend.read_all(matrix.history().failure_table()).unwrap().is_empty());
    }
}
