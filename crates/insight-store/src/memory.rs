use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use insight_core::{AnalysisRecord, RecordSink, StoreError};

/// In-process history store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<i64, AnalysisRecord>,
    next_id: AtomicI64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl RecordSink for MemoryRecordStore {
    async fn save_record(&self, label: &str, text: &str) -> Result<AnalysisRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = AnalysisRecord {
            id,
            label: label.to_string(),
            result_text: text.to_string(),
            created_at: Utc::now(),
        };
        self.records.insert(id, record.clone());
        Ok(record)
    }

    async fn list_records(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut records: Vec<AnalysisRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn get_record(&self, id: i64) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn delete_record(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.records.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assigns_increasing_ids_and_lists_oldest_first() {
        let store = MemoryRecordStore::new();
        let first = store.save_record("a.jpg", "一").await.expect("save");
        let second = store.save_record("b.jpg", "二").await.expect("save");
        assert!(second.id > first.id);

        let labels: Vec<_> = store
            .list_records()
            .await
            .expect("list")
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(labels, vec!["a.jpg", "b.jpg"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_record_matched() {
        let store = MemoryRecordStore::new();
        let record = store.save_record("a.jpg", "一").await.expect("save");
        assert!(store.delete_record(record.id).await.expect("delete"));
        assert!(!store.delete_record(record.id).await.expect("delete again"));
        assert!(store.get_record(record.id).await.expect("get").is_none());
        assert!(store.is_empty());
    }
}
