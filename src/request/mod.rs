//! Crawl requests and their fingerprints
//!
//! A `Request` is created by rule code or seeded at spider start, owned by a
//! matrix queue slot until pulled, and then by the crawl unit executing it
//! until its outcome is reported.

mod temp;

pub use temp::Temp;

use crate::SpindleError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Rule name used when a request does not name one
pub const DEFAULT_RULE: &str = "root";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A single unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Owning spider, set when the request is queued through a spider context
    #[serde(default)]
    pub spider: String,

    /// Target URL
    pub url: String,

    /// Name of the rule that parses the response
    #[serde(default)]
    pub rule: String,

    /// HTTP method, uppercase
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body for POST-like methods
    #[serde(default)]
    pub body: Option<String>,

    /// Higher values are served first
    #[serde(default)]
    pub priority: i32,

    /// Reloadable requests bypass dedup and history entirely
    #[serde(default)]
    pub reloadable: bool,

    /// Download timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Scratch data carried from one rule to the next
    #[serde(default)]
    pub temp: Temp,

    /// Proxy assigned when the request is pulled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Request {
    /// Creates a GET request for `url` with default priority
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            spider: String::new(),
            url: url.into(),
            rule: String::new(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            priority: 0,
            reloadable: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            temp: Temp::default(),
            proxy: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = rule.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_spider(mut self, spider: impl Into<String>) -> Self {
        self.spider = spider.into();
        self
    }

    /// Marks the request as exempt from dedup and history
    pub fn reloadable(mut self, reloadable: bool) -> Self {
        self.reloadable = reloadable;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates and normalizes the request before it is queued
    ///
    /// - The URL must parse and use http or https; its fragment is dropped
    /// - The method is uppercased
    /// - An empty rule becomes [`DEFAULT_RULE`]
    ///
    /// # Returns
    ///
    /// * `Ok(Request)` - The normalized request
    /// * `Err(SpindleError)` - The URL is unusable
    pub fn prepare(mut self) -> Result<Self, SpindleError> {
        let mut url = Url::parse(self.url.trim())?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SpindleError::InvalidRequest(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.url
                )))
            }
        }
        url.set_fragment(None);
        self.url = url.to_string();
        self.method = self.method.trim().to_uppercase();
        if self.method.is_empty() {
            self.method = default_method();
        }
        if self.rule.is_empty() {
            self.rule = DEFAULT_RULE.to_string();
        }
        Ok(self)
    }

    /// Deterministic fingerprint used for dedup and history
    ///
    /// Two requests share a key when they target the same spider, rule, URL,
    /// method and body. Headers, priority and temp data do not participate.
    pub fn unique(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.spider.as_str(),
            self.rule.as_str(),
            self.url.as_str(),
            self.method.as_str(),
            self.body.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Serializes the full request for the failure history
    pub fn serialize(&self) -> Result<String, SpindleError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a request written by [`Request::serialize`]
    pub fn deserialize(s: &str) -> Result<Self, SpindleError> {
        Ok(serde_json::from_str(s)?)
    }
}
