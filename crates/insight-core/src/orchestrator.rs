//! Staged streaming around a single backend call.
//!
//! `StreamOrchestrator::run` turns one `AnalysisBackend::analyze` call into
//! `progress(start) -> progress(processing) -> progress(analyzing) -> notice ->
//! heading -> segments... -> result`, then hands the outcome to a completion
//! callback. Backend failures become a single terminal `Error` event; a
//! vanished consumer or an elapsed deadline stops the sequence quietly.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::backend::{AnalysisBackend, require_text};
use crate::channel::{ChannelOutcome, EventChannel};
use crate::errors::ChannelError;
use crate::model::AnalysisRequest;
use crate::segment::split_sentences;
use crate::stream::{Stage, StreamEvent};

pub const CONNECTING_NOTICE: &str = "正在连接AI服务...";
pub const RESULT_HEADING: &str = "AI分析结果：";
pub const TIMEOUT_MESSAGE: &str = "分析超时，请稍后重试";

const STAGES: [Stage; 3] = [Stage::Start, Stage::Processing, Stage::Analyzing];

/// Final outcome of one streaming run, handed to the completion callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The full result was delivered.
    Completed { text: String },
    /// The backend failed, or the channel was closed with an error.
    ///
    /// Carries the result if the backend had already answered.
    Failed {
        reason: String,
        text: Option<String>,
    },
    /// The channel deadline elapsed first. Carries the result if the backend had already answered.
    TimedOut { text: Option<String> },
    /// The consumer went away. Carries the result if the backend had already answered.
    Disconnected { text: Option<String> },
}

impl RunOutcome {
    /// Analysis text, when the backend produced one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed { text } => Some(text),
            Self::Failed { text, .. } | Self::TimedOut { text } | Self::Disconnected { text } => {
                text.as_deref()
            }
        }
    }
}

/// Invoked exactly once per run with its outcome.
pub type CompletionCallback = Box<dyn FnOnce(RunOutcome) + Send + 'static>;

/// Drives the staged event sequence for streaming requests.
#[derive(Clone)]
pub struct StreamOrchestrator {
    backend: Arc<dyn AnalysisBackend>,
    pacing: Range<Duration>,
}

impl StreamOrchestrator {
    pub fn new(backend: Arc<dyn AnalysisBackend>, pacing: Range<Duration>) -> Self {
        Self { backend, pacing }
    }

    /// Runs the sequence on a background task and returns immediately.
    pub fn spawn(
        &self,
        request: AnalysisRequest,
        channel: EventChannel,
        callback: CompletionCallback,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let span = info_span!(
            "stream_analysis",
            request_id = %request.request_id,
            channel_id = %channel.id(),
            backend = self.backend.name()
        );
        tokio::spawn(async move { orchestrator.run(request, channel, callback).await }.instrument(span))
    }

    /// Runs the full sequence on the current task.
    ///
    /// Never fails: every failure is expressed through the channel and the
    /// `RunOutcome` passed to `callback`.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        channel: EventChannel,
        callback: CompletionCallback,
    ) {
        let (closed_tx, mut closed_rx) = oneshot::channel();
        channel.on_completion(move |outcome| {
            let _ = closed_tx.send(outcome.clone());
        });
        channel.on_timeout(|| Some(StreamEvent::error(TIMEOUT_MESSAGE)));

        let outcome = self.drive(&request, &channel, &mut closed_rx).await;
        info!(
            request_id = %request.request_id,
            channel_id = %channel.id(),
            backend = self.backend.name(),
            outcome = outcome_kind(&outcome),
            "streaming analysis finished"
        );
        callback(outcome);
    }

    async fn drive(
        &self,
        request: &AnalysisRequest,
        channel: &EventChannel,
        closed_rx: &mut oneshot::Receiver<ChannelOutcome>,
    ) -> RunOutcome {
        let request_id = request.request_id;
        for stage in STAGES {
            debug!(request_id = %request_id, %stage, "stage");
            if let Err(err) = channel.send(StreamEvent::progress(stage)).await {
                return interrupted(err, closed_rx, None).await;
            }
        }
        if let Err(err) = channel.send(StreamEvent::content(CONNECTING_NOTICE)).await {
            return interrupted(err, closed_rx, None).await;
        }

        let analysis = tokio::select! {
            result = self.backend.analyze(&request.image, &request.question) => {
                result.and_then(require_text)
            }
            closed = &mut *closed_rx => {
                let outcome = closed.unwrap_or(ChannelOutcome::ConsumerGone);
                debug!(request_id = %request_id, ?outcome, "channel closed while waiting on backend");
                return from_channel_outcome(outcome, None);
            }
        };

        let text = match analysis {
            Ok(text) => text,
            Err(err) => {
                warn!(request_id = %request_id, backend = self.backend.name(), error = %err, "analysis backend failed");
                let reason = err.to_string();
                let event = StreamEvent::error(format!("AI分析失败: {reason}"));
                if let Err(err) = channel.send_and_complete(event).await {
                    return interrupted(err, closed_rx, None).await;
                }
                return RunOutcome::Failed { reason, text: None };
            }
        };

        if let Err(err) = channel.send(StreamEvent::content(RESULT_HEADING)).await {
            return interrupted(err, closed_rx, Some(text)).await;
        }
        let segments = split_sentences(&text);
        debug!(request_id = %request_id, segments = segments.len(), "streaming result segments");
        for segment in segments {
            if let Err(err) = channel.send(StreamEvent::content(segment)).await {
                return interrupted(err, closed_rx, Some(text)).await;
            }
            if let Some(delay) = pacing_delay(&self.pacing) {
                tokio::time::sleep(delay).await;
            }
        }

        match channel.send_and_complete(StreamEvent::result(text.clone())).await {
            Ok(()) => RunOutcome::Completed { text },
            Err(err) => interrupted(err, closed_rx, Some(text)).await,
        }
    }
}

/// Resolves why a send failed from the channel's own terminal outcome.
async fn interrupted(
    err: ChannelError,
    closed_rx: &mut oneshot::Receiver<ChannelOutcome>,
    text: Option<String>,
) -> RunOutcome {
    let outcome = closed_rx.await.unwrap_or(ChannelOutcome::ConsumerGone);
    debug!(error = %err, ?outcome, "stopping stream early");
    from_channel_outcome(outcome, text)
}

fn from_channel_outcome(outcome: ChannelOutcome, text: Option<String>) -> RunOutcome {
    match outcome {
        ChannelOutcome::TimedOut => RunOutcome::TimedOut { text },
        ChannelOutcome::Errored { reason } => RunOutcome::Failed { reason, text },
        ChannelOutcome::ConsumerGone | ChannelOutcome::Completed => {
            RunOutcome::Disconnected { text }
        }
    }
}

fn outcome_kind(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed { .. } => "completed",
        RunOutcome::Failed { .. } => "failed",
        RunOutcome::TimedOut { .. } => "timed_out",
        RunOutcome::Disconnected { .. } => "disconnected",
    }
}

fn pacing_delay(window: &Range<Duration>) -> Option<Duration> {
    if window.is_empty() {
        return None;
    }
    Some(rand::rng().random_range(window.clone()))
}
