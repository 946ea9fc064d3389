//! Per-spider request history
//!
//! A `History` remembers which requests of one spider run already succeeded
//! and which failed, and moves that knowledge to and from a storage backend
//! so it survives restarts.
//!
//! The backend is passed to each reading or flushing call rather than fixed
//! at construction, so one history can serve different backends over its
//! lifetime.

mod failure;
mod success;

use crate::request::Request;
use crate::storage::{HistoryStorage, StorageResult};
use failure::{decode_records, FailureList};
use parking_lot::Mutex;
use std::collections::HashMap;
use success::{write_keys, SuccessSet};
use tracing::{debug, info};

/// Prefix shared by every history table
pub const HISTORY_TAG: &str = "history";

/// Builds a backend table name for one spider run
///
/// `kind` is `y` for successes and `n` for failures. Characters outside
/// `[A-Za-z0-9_]` are replaced with `_`.
pub fn table_name(kind: &str, spider: &str, sub_name: &str) -> String {
    let mut name = format!("{}__{}__{}", HISTORY_TAG, kind, spider);
    if !sub_name.is_empty() {
        name.push_str("__");
        name.push_str(sub_name);
    }
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Success and failure history of one (spider, sub-name) pair
#[derive(Debug)]
pub struct History {
    success_table: String,
    failure_table: String,
    success: Mutex<SuccessSet>,
    failure: Mutex<FailureList>,
}

impl History {
    pub fn new(spider: &str, sub_name: &str) -> Self {
        Self {
            success_table: table_name("y", spider, sub_name),
            failure_table: table_name("n", spider, sub_name),
            success: Mutex::new(SuccessSet::default()),
            failure: Mutex::new(FailureList::default()),
        }
    }

    pub fn success_table(&self) -> &str {
        &self.success_table
    }

    pub fn failure_table(&self) -> &str {
        &self.failure_table
    }

    // ===== Success =====

    /// Loads durable success keys
    ///
    /// Without `inherit` every in-memory key is discarded and nothing is read.
    /// With `inherit`, keys are read once per process; later calls return
    /// immediately.
    ///
    /// # Returns
    ///
    /// The number of keys known after the call
    pub fn read_success<S: HistoryStorage + ?Sized>(&self, backend: &S, inherit: bool) -> StorageResult<usize> {
        {
            let mut success = self.success.lock();
            if !inherit {
                success.clear();
                success.inherited = false;
                return Ok(0);
            }
            if success.inherited {
                return Ok(success.len());
            }
        }

        let records = backend.read_all(&self.success_table)?;

        let mut success = self.success.lock();
        success.clear();
        success.old.extend(records.into_iter().map(|r| r.key));
        success.inherited = true;
        info!("Loaded {} success records from {}", success.old.len(), self.success_table);
        Ok(success.old.len())
    }

    /// Records `key` as succeeded
    ///
    /// # Returns
    ///
    /// `false` if the key was already known
    pub fn upsert_success(&self, key: &str) -> bool {
        self.success.lock().upsert(key)
    }

    pub fn has_success(&self, key: &str) -> bool {
        self.success.lock().has(key)
    }

    /// Forgets a key that has not been flushed yet
    pub fn delete_success(&self, key: &str) {
        self.success.lock().delete(key);
    }

    /// Writes pending success keys to `backend`
    ///
    /// Nothing is written when there is nothing pending. On a write error the
    /// pending keys are kept for the next flush, except with append-only
    /// backends, which treat them as written either way.
    ///
    /// # Returns
    ///
    /// The number of keys written
    pub fn flush_success<S: HistoryStorage + ?Sized>(&self, backend: &S) -> StorageResult<usize> {
        let pending = self.success.lock().pending();
        if pending.is_empty() {
            return Ok(0);
        }

        let (committed, result) = write_keys(backend, &self.success_table, &pending);
        if committed {
            self.success.lock().commit(pending);
        }
        let written = result?;
        info!("Flushed {} success records to {}", written, self.success_table);
        Ok(written)
    }

    // ===== Failure =====

    /// Loads durable failed requests, with the same inherit rules as
    /// [`History::read_success`]
    pub fn read_failure<S: HistoryStorage + ?Sized>(&self, backend: &S, inherit: bool) -> StorageResult<usize> {
        {
            let mut failure = self.failure.lock();
            if !inherit {
                failure.list.clear();
                failure.inherited = false;
                return Ok(0);
            }
            if failure.inherited {
                return Ok(failure.list.len());
            }
        }

        let records = backend.read_all(&self.failure_table)?;
        let list = decode_records(&self.failure_table, records);

        let mut failure = self.failure.lock();
        failure.list = list;
        failure.inherited = true;
        info!("Loaded {} failure records from {}", failure.list.len(), self.failure_table);
        Ok(failure.list.len())
    }

    /// Records a failed request
    ///
    /// # Returns
    ///
    /// `false` if a request with the same key was already recorded
    pub fn upsert_failure(&self, req: Request) -> bool {
        let url = req.url.clone();
        let inserted = self.failure.lock().upsert(req);
        if inserted {
            debug!("Recorded failed request {}", url);
        }
        inserted
    }

    pub fn delete_failure(&self, req: &Request) {
        self.failure.lock().delete(req);
    }

    /// Takes every loaded failure out of the history
    ///
    /// The caller becomes responsible for retrying them; only failures
    /// recorded afterwards remain here.
    pub fn pull_failure(&self) -> HashMap<String, Request> {
        std::mem::take(&mut self.failure.lock().list)
    }

    /// Replaces the durable failure set with the in-memory one
    ///
    /// Requests that failed before and were retried successfully are no
    /// longer in memory, so they disappear from the backend too.
    pub fn flush_failure<S: HistoryStorage + ?Sized>(&self, backend: &S) -> StorageResult<usize> {
        let records = self.failure.lock().snapshot();
        let written = backend.replace_all(&self.failure_table, &records)?;
        if written > 0 {
            info!("Flushed {} failure records to {}", written, self.failure_table);
        }
        Ok(written)
    }

    // ===== Both =====

    /// Clears all in-memory success and failure state
    ///
    /// The next inheriting read loads from the backend again.
    pub fn empty(&self) {
        let mut success = self.success.lock();
        success.clear();
        success.inherited = false;
        drop(success);

        let mut failure = self.failure.lock();
        failure.list.clear();
        failure.inherited = false;
    }

    /// Number of known success keys, durable or pending
    pub fn success_len(&self) -> usize {
        self.success.lock().len()
    }

    pub fn failure_len(&self) -> usize {
        self.failure.lock().list.len()
    }
}
