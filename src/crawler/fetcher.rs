//! HTTP downloader
//!
//! This module handles the network side of a request:
//! - Building HTTP clients with proper user agent strings
//! - One client per proxy, reused across requests
//! - Honoring the request's method, headers, body and timeout
//!
//! The downloader does not retry; a failed download is reported to the
//! matrix, which decides whether the request gets its one retry.

use crate::config::UserAgentConfig;
use crate::request::Request;
use crate::spider::SpiderRun;
use crate::SpindleError;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{redirect::Policy, Client, Method, Proxy};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// A downloaded response
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header value
    pub content_type: String,
    /// Response headers, lowercase names
    pub headers: BTreeMap<String, String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl Page {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html")
    }
}

/// Outcome of one download
pub type FetchResult = Result<Page, SpindleError>;

/// Fetches the page of a request
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, run: &SpiderRun, req: &Request) -> FetchResult;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `proxy` - Proxy every request of this client goes through
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &UserAgentConfig, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// Downloader backed by reqwest
pub struct HttpDownloader {
    user_agent: UserAgentConfig,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpDownloader {
    pub fn new(user_agent: &UserAgentConfig) -> Result<Self, SpindleError> {
        let direct = build_http_client(user_agent, None).map_err(|e| SpindleError::Http {
            url: String::new(),
            source: e,
        })?;
        Ok(Self {
            user_agent: user_agent.clone(),
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, proxy: Option<&str>) -> Result<Client, SpindleError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock();
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_http_client(&self.user_agent, Some(proxy)).map_err(|e| SpindleError::Http {
            url: proxy.to_string(),
            source: e,
        })?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, run: &SpiderRun, req: &Request) -> FetchResult {
        let client = self.client(req.proxy.as_deref())?;
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|_| SpindleError::InvalidRequest(format!("bad method '{}'", req.method)))?;

        let mut builder = client.request(method, &req.url).timeout(req.timeout());
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        debug!("[{}] {} {}", run.name(), req.method, req.url);
        let http_err = |source| SpindleError::Http {
            url: req.url.clone(),
            source,
        };
        let response = builder.send().await.map_err(http_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpindleError::Download {
                url: req.url.clone(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let body = response.bytes().await.map_err(http_err)?.to_vec();

        Ok(Page {
            url,
            status: status.as_u16(),
            content_type,
            headers,
            body,
        })
    }
}
