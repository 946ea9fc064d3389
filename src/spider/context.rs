//! Context handed to spider rules

use crate::crawler::Page;
use crate::pipeline::{DataCell, FileCell};
use crate::request::{Request, DEFAULT_RULE};
use crate::spider::{Clock, SpiderRun};
use crate::{Result, SpindleError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// What a rule can see and do while it runs
///
/// Records and files produced by the rule are collected here and forwarded
/// to the pipeline by the crawl unit once the rule returns.
pub struct Context {
    run: Arc<SpiderRun>,
    request: Option<Request>,
    page: Option<Page>,
    items: Mutex<Vec<DataCell>>,
    files: Mutex<Vec<FileCell>>,
}

impl Context {
    /// Context of the root rules, with no request or page
    pub fn root(run: Arc<SpiderRun>) -> Self {
        Self::new(run, None, None)
    }

    /// Context for parsing `page`, downloaded for `request`
    pub fn for_page(run: Arc<SpiderRun>, request: Request, page: Page) -> Self {
        Self::new(run, Some(request), Some(page))
    }

    fn new(run: Arc<SpiderRun>, request: Option<Request>, page: Option<Page>) -> Self {
        Self {
            run,
            request,
            page,
            items: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn run(&self) -> &Arc<SpiderRun> {
        &self.run
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    /// Name of the rule being run
    pub fn rule(&self) -> &str {
        self.request.as_ref().map_or(DEFAULT_RULE, |r| r.rule.as_str())
    }

    /// Queues a new request for this spider
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The request was queued
    /// * `Ok(false)` - It was dropped as a duplicate or because the scheduler stopped
    /// * `Err(SpindleError::ForcedStop)` - The spider is stopping
    /// * `Err(_)` - The request is invalid
    pub async fn add_queue(&self, req: Request) -> Result<bool> {
        if self.run.is_stopping() {
            return Err(SpindleError::ForcedStop(self.run.name().to_string()));
        }
        let req = req.with_spider(self.run.name()).prepare()?;
        let matrix = self.run.matrix();
        // Page contexts run while their request holds a slot
        if self.request.is_some() {
            Ok(matrix.push_from_slot(req).await)
        } else {
            Ok(matrix.push(req).await)
        }
    }

    /// Sets a clock on the run's timer, see [`SpiderRun::set_timer`]
    pub fn set_timer(&self, id: &str, clock: Clock) -> bool {
        self.run.set_timer(id, clock)
    }

    /// Sleeps on a clock of the run's timer, see [`SpiderRun::run_timer`]
    pub async fn run_timer(&self, id: &str) -> bool {
        self.run.run_timer(id).await
    }

    /// Emits one record
    pub fn output(&self, fields: Map<String, Value>) {
        let url = self
            .page
            .as_ref()
            .map(|p| p.url.clone())
            .or_else(|| self.request.as_ref().map(|r| r.url.clone()))
            .unwrap_or_default();
        let mut cell = DataCell::new(self.run.name(), self.rule(), url);
        cell.fields = fields;
        self.items.lock().push(cell);
    }

    /// Emits one file
    pub fn file(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().push(FileCell {
            spider: self.run.name().to_string(),
            rule: self.rule().to_string(),
            name: name.into(),
            bytes,
        });
    }

    pub(crate) fn take_items(&self) -> Vec<DataCell> {
        std::mem::take(&mut *self.items.lock())
    }

    pub(crate) fn take_files(&self) -> Vec<FileCell> {
        std::mem::take(&mut *self.files.lock())
    }
}
