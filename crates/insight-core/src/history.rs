//! Analysis history: the record type, the store contract, and the recorder
//! that turns a finished run into one save attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::orchestrator::{CompletionCallback, RunOutcome};

/// One persisted analysis.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    /// Assigned by the store.
    pub id: i64,
    /// Image label, e.g. `图片_1700000000000.jpg`.
    pub label: String,
    pub result_text: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence capability for analysis history.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Stores a new record and returns it with its assigned id.
    async fn save_record(&self, label: &str, text: &str) -> Result<AnalysisRecord, StoreError>;

    /// All records ordered by creation time, oldest first.
    async fn list_records(&self) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Looks up a single record.
    async fn get_record(&self, id: i64) -> Result<Option<AnalysisRecord>, StoreError>;

    /// Deletes a record. Returns false when nothing matched.
    async fn delete_record(&self, id: i64) -> Result<bool, StoreError>;
}

/// Label stored for an uploaded image, derived from the upload time.
pub fn image_label(at: DateTime<Utc>) -> String {
    format!("图片_{}.jpg", at.timestamp_millis())
}

/// Text saved in place of a result when the backend produced none.
pub fn placeholder_text(question: &str) -> String {
    format!("模拟AI分析结果：这是一张图片，包含{question}")
}

/// Best-effort persistence of finished analyses.
///
/// Saves run on their own task; failures are logged and never reach the
/// client. Runs without a result still leave a record with placeholder text.
#[derive(Clone)]
pub struct HistoryRecorder {
    sink: Arc<dyn RecordSink>,
}

impl HistoryRecorder {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.sink
    }

    /// Saves `text` under `label`, logging instead of failing.
    pub async fn record(&self, label: &str, text: &str) -> Option<AnalysisRecord> {
        match self.sink.save_record(label, text).await {
            Ok(record) => {
                debug!(record_id = record.id, label, "analysis record saved");
                Some(record)
            }
            Err(err) => {
                warn!(label, error = %err, "failed to save analysis record");
                None
            }
        }
    }

    /// Builds the completion callback for one streaming request.
    ///
    /// The callback issues exactly one save: the result text when there is
    /// one, otherwise the placeholder for `question`.
    pub fn completion_callback(&self, label: String, question: String) -> CompletionCallback {
        let recorder = self.clone();
        Box::new(move |outcome: RunOutcome| {
            let text = outcome
                .text()
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| placeholder_text(&question));
            tokio::spawn(async move {
                recorder.record(&label, &text).await;
            });
        })
    }
}
