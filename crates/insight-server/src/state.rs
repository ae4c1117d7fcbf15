use insight_core::{Analyzer, HistoryRecorder};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
    pub recorder: HistoryRecorder,
    /// Largest accepted image upload, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(analyzer: Analyzer, recorder: HistoryRecorder, max_upload_bytes: usize) -> Self {
        Self {
            analyzer,
            recorder,
            max_upload_bytes,
        }
    }
}
