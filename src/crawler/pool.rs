//! Crawler pool
//!
//! A bounded, lazily growing set of reusable crawl units.

use crate::crawler::fetcher::Downloader;
use crate::crawler::unit::CrawlUnit;
use crate::state::Status;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

struct PoolInner {
    capacity: usize,
    idle: VecDeque<Arc<CrawlUnit>>,
    all: Vec<Arc<CrawlUnit>>,
    status: Status,
    next_id: usize,
}

/// Pool of crawl units shared by the spider runs of one batch
pub struct CrawlerPool {
    max_crawlers: usize,
    downloader: Arc<dyn Downloader>,
    flush_interval: Duration,
    inner: Mutex<PoolInner>,
    returned: Notify,
}

impl CrawlerPool {
    /// Creates a stopped pool; call [`CrawlerPool::reset`] before use
    pub fn new(max_crawlers: usize, downloader: Arc<dyn Downloader>, flush_interval: Duration) -> Self {
        Self {
            max_crawlers: max_crawlers.max(1),
            downloader,
            flush_interval,
            inner: Mutex::new(PoolInner {
                capacity: 1,
                idle: VecDeque::new(),
                all: Vec::new(),
                status: Status::Stop,
                next_id: 0,
            }),
            returned: Notify::new(),
        }
    }

    /// Sizes the pool for `desired` spider runs and sets it running
    ///
    /// # Returns
    ///
    /// The capacity in effect: `desired` capped at the configured maximum,
    /// and never less than 1
    pub fn reset(&self, desired: usize) -> usize {
        let mut inner = self.inner.lock();
        let capacity = desired.min(self.max_crawlers).max(1);
        inner.capacity = capacity;

        inner.all.truncate(capacity);
        inner.idle = inner.all.iter().cloned().collect();
        inner.status = Status::Run;

        info!("Crawler pool reset to capacity {}", capacity);
        capacity
    }

    /// Hands out a crawl unit
    ///
    /// Idle units are reused; below capacity a new unit is created; otherwise
    /// this waits until a unit is returned. Returns `None` once the pool stops.
    pub async fn use_unit(&self) -> Option<Arc<CrawlUnit>> {
        loop {
            let returned = self.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.status.is_stopping() {
                    return None;
                }
                if let Some(unit) = inner.idle.pop_front() {
                    return Some(unit);
                }
                if inner.all.len() < inner.capacity {
                    let unit = Arc::new(CrawlUnit::new(
                        inner.next_id,
                        Arc::clone(&self.downloader),
                        self.flush_interval,
                    ));
                    inner.next_id += 1;
                    inner.all.push(Arc::clone(&unit));
                    debug!("Created crawl unit {}", unit.id());
                    return Some(unit);
                }
            }

            returned.await;
        }
    }

    /// Returns a unit to the pool
    ///
    /// The unit is only reused when the pool is running and the unit's spider
    /// run has no work left; otherwise it is discarded and its place freed
    /// for a new unit.
    pub async fn free(&self, unit: Arc<CrawlUnit>) {
        let reusable = unit.can_stop().await;

        let mut inner = self.inner.lock();
        if inner.status.is_running() && reusable {
            inner.idle.push_back(unit);
        } else {
            inner.all.retain(|u| !Arc::ptr_eq(u, &unit));
            debug!("Discarded crawl unit {}", unit.id());
        }
        drop(inner);
        self.returned.notify_one();
    }

    /// Stops the pool and every unit it created
    pub fn stop(&self) {
        let units = {
            let mut inner = self.inner.lock();
            inner.status = Status::Stop;
            inner.idle.clear();
            inner.all.clone()
        };
        for unit in &units {
            unit.stop();
        }
        self.returned.notify_waiters();
        info!("Crawler pool stopped ({} units)", units.len());
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Units created so far and still owned by the pool
    pub fn count(&self) -> usize {
        self.inner.lock().all.len()
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status
    }
}
