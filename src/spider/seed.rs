//! Built-in spider crawling a fixed list of seed URLs
//!
//! Each fetched HTML page produces one record with its URL, title and
//! status. With `follow_links`, links to the same host are queued as well.

use crate::config::SpiderEntry;
use crate::request::Request;
use crate::spider::{Context, Spider, SpiderRules};
use crate::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Rule that handles every fetched page
pub const PAGE_RULE: &str = "page";

/// Title and outgoing links of an HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    /// Absolute http(s) links, in document order
    pub links: Vec<String>,
}

/// Extracts the title and links of an HTML document
///
/// Links come from `<a href>` (skipping `download` anchors) and
/// `<link rel="canonical">`. Script, mail, phone, data and same-page
/// anchors are dropped, as is anything that does not resolve to http(s).
pub fn extract_page(html: &str, base_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);
    ExtractedPage {
        title: select_title(&document),
        links: select_links(&document, base_url),
    }
}

fn select_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn select_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(anchors) = Selector::parse("a[href]") {
        for el in document.select(&anchors) {
            if el.value().attr("download").is_some() {
                continue;
            }
            if let Some(link) = el.value().attr("href").and_then(|h| resolve(h, base_url)) {
                links.push(link);
            }
        }
    }

    if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
        for el in document.select(&canonical) {
            if let Some(link) = el.value().attr("href").and_then(|h| resolve(h, base_url)) {
                links.push(link);
            }
        }
    }

    links
}

fn resolve(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| href.starts_with(scheme))
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Seed-list spider rules
#[derive(Debug, Clone)]
pub struct SeedSpider {
    seeds: Vec<String>,
    follow_links: bool,
}

impl SeedSpider {
    pub fn new(seeds: Vec<String>, follow_links: bool) -> Self {
        Self { seeds, follow_links }
    }

    /// Builds a spider from its configuration entry
    pub fn spider(entry: &SpiderEntry) -> Spider {
        Spider::new(
            entry.name.clone(),
            Arc::new(Self::new(entry.seeds.clone(), entry.follow_links)),
        )
        .with_description(entry.description.clone())
        .with_keyin(entry.keyin.clone())
        .with_limit(entry.limit)
        .with_pause_time(Duration::from_millis(entry.pause_time))
    }
}

#[async_trait]
impl SpiderRules for SeedSpider {
    async fn root(&self, ctx: &Context) -> Result<()> {
        for seed in &self.seeds {
            ctx.add_queue(Request::new(seed.as_str()).with_rule(PAGE_RULE)).await?;
        }
        Ok(())
    }

    async fn parse(&self, ctx: &Context) -> Result<()> {
        let Some(page) = ctx.page() else {
            return Ok(());
        };

        let base = Url::parse(&page.url)?;
        let extracted = if page.is_html() || page.content_type.is_empty() {
            extract_page(&page.text(), &base)
        } else {
            ExtractedPage::default()
        };

        let mut fields = Map::new();
        fields.insert("url".to_string(), Value::from(page.url.clone()));
        fields.insert(
            "title".to_string(),
            extracted.title.clone().map_or(Value::Null, Value::from),
        );
        fields.insert("status".to_string(), Value::from(page.status));
        ctx.output(fields);

        if !self.follow_links {
            return Ok(());
        }

        let mut queued = 0;
        for link in extracted.links {
            let same_host = Url::parse(&link)
                .map(|u| u.host_str() == base.host_str())
                .unwrap_or(false);
            if same_host && ctx.add_queue(Request::new(link).with_rule(PAGE_RULE)).await? {
                queued += 1;
            }
        }
        debug!("[{}] Queued {} links from {}", ctx.run().name(), queued, page.url);
        Ok(())
    }
}
