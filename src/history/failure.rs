//! Failed requests kept for retry

use crate::request::Request;
use crate::storage::HistoryRecord;
use std::collections::HashMap;
use tracing::warn;

/// Failed requests keyed by `Request::unique()`
#[derive(Debug, Default)]
pub(crate) struct FailureList {
    pub(crate) inherited: bool,
    pub(crate) list: HashMap<String, Request>,
}

impl FailureList {
    pub(crate) fn upsert(&mut self, req: Request) -> bool {
        let key = req.unique();
        if self.list.contains_key(&key) {
            return false;
        }
        self.list.insert(key, req);
        true
    }

    pub(crate) fn delete(&mut self, req: &Request) {
        self.list.remove(&req.unique());
    }

    /// Serializes every entry for a backend write
    pub(crate) fn snapshot(&self) -> Vec<HistoryRecord> {
        let mut records = Vec::with_capacity(self.list.len());
        for (key, req) in &self.list {
            match req.serialize() {
                Ok(payload) => records.push(HistoryRecord::with_payload(key.clone(), payload)),
                Err(e) => warn!("Dropping unserializable failed request {}: {}", req.url, e),
            }
        }
        records
    }
}

/// Restores requests from backend records, skipping unreadable payloads
pub(crate) fn decode_records(table: &str, records: Vec<HistoryRecord>) -> HashMap<String, Request> {
    let mut list = HashMap::with_capacity(records.len());
    for record in records {
        let Some(payload) = record.payload else {
            warn!("Failure record {} in {} has no payload", record.key, table);
            continue;
        };
        match Request::deserialize(&payload) {
            Ok(req) => {
                list.insert(record.key, req);
            }
            Err(e) => warn!("Skipping failure record {} in {}: {}", record.key, table, e),
        }
    }
    list
}
