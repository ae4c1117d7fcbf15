//! Common imports for typical usage.
pub use crate::{
    AnalysisBackend, AnalysisRecord, AnalysisRequest, Analyzer, AnalyzerBuilder, AnalyzerError,
    BackendError, CompletionCallback, EventReceiver, HistoryRecorder, ImageSource, RecordSink,
    RunOutcome, Stage, StreamEvent, StreamOptions,
};
