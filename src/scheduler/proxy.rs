//! Proxy selection for pulled requests

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Source of proxy addresses consulted when a request is pulled
#[async_trait]
pub trait ProxyManager: Send + Sync {
    /// Resolves once the manager has loaded its proxies
    async fn ready(&self) {}

    /// Proxy to use for `url`, if any
    fn get_one(&self, url: &str) -> Option<String>;

    /// Number of proxies currently available
    fn count(&self) -> usize;

    /// Sets how often each host moves to the next proxy
    fn update_ticker(&self, minutes: u64);
}

/// Manager with no proxies; rotation stays disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProxy;

#[async_trait]
impl ProxyManager for NoProxy {
    fn get_one(&self, _url: &str) -> Option<String> {
        None
    }

    fn count(&self) -> usize {
        0
    }

    fn update_ticker(&self, _minutes: u64) {}
}

#[derive(Debug)]
struct HostSlot {
    index: usize,
    since: Instant,
}

/// Fixed proxy list rotated per host
///
/// Each host keeps its current proxy for one ticker interval, then moves to
/// the next one in the list.
#[derive(Debug)]
pub struct ProxyList {
    proxies: Vec<String>,
    interval: RwLock<Duration>,
    hosts: Mutex<HashMap<String, HostSlot>>,
}

impl ProxyList {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            interval: RwLock::new(Duration::from_secs(60)),
            hosts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProxyManager for ProxyList {
    fn get_one(&self, url: &str) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let interval = *self.interval.read();

        let mut hosts = self.hosts.lock();
        // New hosts start at different offsets so they spread over the list
        let start = hosts.len() % self.proxies.len();
        let slot = hosts.entry(host).or_insert_with(|| HostSlot {
            index: start,
            since: Instant::now(),
        });
        if slot.since.elapsed() >= interval {
            slot.index = (slot.index + 1) % self.proxies.len();
            slot.since = Instant::now();
            debug!("Rotated proxy to {}", self.proxies[slot.index]);
        }
        Some(self.proxies[slot.index].clone())
    }

    fn count(&self) -> usize {
        self.proxies.len()
    }

    fn update_ticker(&self, minutes: u64) {
        *self.interval.write() = Duration::from_secs(minutes * 60);
    }
}
