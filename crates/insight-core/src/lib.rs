//! Streaming image analysis: one backend call turned into an ordered,
//! cancellable stream of progress, content and result events.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use insight_core::prelude::*;
//! use insight_core::vendors::dashscope::DashScopeBackend;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let analyzer = Analyzer::builder()
//!     .backend(Arc::new(DashScopeBackend::from_env()?))
//!     .build()?;
//!
//! let request = AnalysisRequest::from_url(
//!     "https://example.com/dog_and_girl.jpeg",
//!     "图中描绘的是什么景象?",
//! );
//! let mut events = analyzer.start_stream(request, Box::new(|outcome| {
//!     println!("finished: {outcome:?}");
//! }))?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         StreamEvent::Content { content } => println!("{content}"),
//!         StreamEvent::Result { .. } => break,
//!         StreamEvent::Error { message } => eprintln!("analysis error: {message}"),
//!         StreamEvent::Progress { .. } => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// `Analyzer` entry point and builder.
pub mod analyzer;
/// The analysis backend contract.
pub mod backend;
/// Ordered single-consumer event channel with a deadline.
pub mod channel;
/// Public error types.
pub mod errors;
/// Analysis history records, store contract and recorder.
pub mod history;
/// Requests, image sources and stream options.
pub mod model;
/// Tracing initialisation.
pub mod observability;
/// Staged streaming sequence.
pub mod orchestrator;
/// Common imports for typical usage.
pub mod prelude;
/// Sentence segmentation.
pub mod segment;
/// Events delivered to streaming clients.
pub mod stream;
/// Concrete backends.
pub mod vendors;
/// SSE framing of stream events.
pub mod wire;

pub use analyzer::{Analyzer, AnalyzerBuilder};
pub use backend::AnalysisBackend;
pub use channel::{ChannelOutcome, ChannelState, EventChannel, EventReceiver};
pub use errors::{AnalyzerError, BackendError, ChannelError, StoreError};
pub use history::{AnalysisRecord, HistoryRecorder, RecordSink};
pub use model::{AnalysisRequest, ImageSource, StreamOptions};
pub use observability::init_observability;
pub use orchestrator::{CompletionCallback, RunOutcome, StreamOrchestrator};
pub use stream::{Stage, StreamEvent};
