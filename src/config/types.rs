use crate::storage::OutputKind;
use serde::Deserialize;

/// Main configuration structure for Sumi-Spindle
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default, rename = "spider")]
    pub spiders: Vec<SpiderEntry>,
}

/// Whether history is used at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Batch runs that read and write history
    #[default]
    Offline,
    /// Always-on service; history is neither loaded nor flushed
    Server,
}

/// Global scheduling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Global number of requests allowed in flight
    #[serde(rename = "thread-num", default = "default_thread_num")]
    pub thread_num: usize,

    /// Proxy rotation interval in minutes (0 disables proxies)
    #[serde(rename = "proxy-minute", default)]
    pub proxy_minute: u64,

    #[serde(default)]
    pub mode: RunMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_num: default_thread_num(),
            proxy_minute: 0,
            mode: RunMode::default(),
        }
    }
}

fn default_thread_num() -> usize {
    20
}

/// History persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Backend history is written to
    #[serde(default)]
    pub output: OutputKind,

    /// Skip requests that succeeded in earlier runs
    #[serde(rename = "success-inherit", default = "default_true")]
    pub success_inherit: bool,

    /// Retry requests that failed in earlier runs
    #[serde(rename = "failure-inherit", default = "default_true")]
    pub failure_inherit: bool,

    /// Directory for the `file` backend
    #[serde(rename = "history-dir", default)]
    pub history_dir: Option<String>,

    /// Database file for the `sqlite` backend
    #[serde(rename = "database-path", default)]
    pub database_path: Option<String>,

    /// Database directory for the `sled` backend
    #[serde(rename = "sled-path", default)]
    pub sled_path: Option<String>,

    /// Seconds between periodic success flushes while a spider runs
    #[serde(rename = "flush-interval-secs", default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            output: OutputKind::default(),
            success_inherit: true,
            failure_inherit: true,
            history_dir: None,
            database_path: None,
            sled_path: None,
            flush_interval_secs: default_flush_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_flush_interval() -> u64 {
    60
}

/// Crawler pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on crawl units, whatever the number of spiders
    #[serde(rename = "max-crawlers", default = "default_max_crawlers")]
    pub max_crawlers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_crawlers: default_max_crawlers(),
        }
    }
}

fn default_max_crawlers() -> usize {
    16
}

/// Output pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory the default pipeline writes into
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Records buffered per spider before a write
    #[serde(rename = "docker-cap", default = "default_docker_cap")]
    pub docker_cap: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            docker_cap: default_docker_cap(),
        }
    }
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_docker_cap() -> usize {
    1000
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

impl UserAgentConfig {
    /// `Name/Version (+contact-url)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

/// Proxy list used when `proxy-minute` is set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxies: Vec<String>,
}

/// One configured seed-list spider
#[derive(Debug, Clone, Deserialize)]
pub struct SpiderEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Run keyword; distinguishes history of runs of the same spider
    #[serde(default)]
    pub keyin: String,

    /// Negative values cap the number of admitted pages; 0 or more disables the cap
    #[serde(default)]
    pub limit: i64,

    /// Base delay between requests in milliseconds
    #[serde(rename = "pause-time", default = "default_pause_time")]
    pub pause_time: u64,

    pub seeds: Vec<String>,

    /// Queue same-host links found on fetched pages
    #[serde(rename = "follow-links", default)]
    pub follow_links: bool,
}

fn default_pause_time() -> u64 {
    300
}
