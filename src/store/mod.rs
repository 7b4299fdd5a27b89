//! In-memory execution store keyed by execution id.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FlowError, FlowResult};
use crate::record::ExecutionRecord;

/// Concurrent map of execution records. Running records are replaced by
/// their sealed version when the submission finishes.
#[derive(Default)]
pub struct ExecutionStore {
    records: DashMap<String, Arc<ExecutionRecord>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Arc<ExecutionRecord>) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> FlowResult<Arc<ExecutionRecord>> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FlowError::ExecutionNotFound { id: id.to_string() })
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<ExecutionRecord>> {
        let mut records: Vec<Arc<ExecutionRecord>> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Context;
    use chrono::Duration;

    fn record(goal: &str, age_secs: i64) -> Arc<ExecutionRecord> {
        let mut record = ExecutionRecord::new(goal, Context::new());
        record.created_at = record.created_at - Duration::seconds(age_secs);
        Arc::new(record)
    }

    #[test]
    fn insert_and_get() {
        let store = ExecutionStore::new();
        let rec = record("g", 0);
        store.insert(rec.clone());
        assert_eq!(store.get(&rec.id).unwrap().goal, "g");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_id_is_not_found() {
        let store = ExecutionStore::new();
        assert!(store.is_empty());
        match store.get("nope") {
            Err(FlowError::ExecutionNotFound { id }) => assert_eq!(id, "nope"),
            _ => panic!("expected ExecutionNotFound"),
        }
    }

    #[test]
    fn insert_replaces_same_id() {
        let store = ExecutionStore::new();
        let first = record("g", 0);
        let mut second = (*first).clone();
        second.goal = "updated".into();
        store.insert(first.clone());
        store.insert(Arc::new(second));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first.id).unwrap().goal, "updated");
    }

    #[test]
    fn recent_is_newest_first() {
        let store = ExecutionStore::new();
        store.insert(record("old", 30));
        store.insert(record("new", 0));
        store.insert(record("mid", 10));
        let goals: Vec<String> = store.recent(2).iter().map(|r| r.goal.clone()).collect();
        assert_eq!(goals, vec!["new", "mid"]);
    }
}
