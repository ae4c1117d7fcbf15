/// Failures reported by an `AnalysisBackend`.
///
/// This is the structured replacement for text-prefixed error results: callers
/// branch on the variant, never on the content of a returned string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Backend is not usable as configured (missing key, bad URL, ...).
    #[error("backend config error: {0}")]
    Config(String),
    /// Network or I/O failure talking to the backend.
    #[error("backend transport error: {0}")]
    Transport(String),
    /// Backend answered with an application-level failure.
    #[error("backend provider error: {message}")]
    Provider {
        message: String,
        status_code: Option<u16>,
    },
    /// Backend answered successfully but without any analysis text.
    #[error("backend returned no analysis text")]
    EmptyResult,
    /// Backend response did not have the expected shape.
    #[error("backend protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Creates a provider-level error.
    pub fn provider(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Provider {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Errors returned by `EventChannel::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel already reached a terminal state.
    #[error("event channel is closed")]
    ChannelClosed,
    /// The consumer side of the channel went away.
    #[error("event consumer disconnected")]
    ConsumerGone,
}

/// Errors returned by a `RecordSink`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("store backend error: {0}")]
    Backend(String),
    /// Filesystem failure while preparing the store.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    /// Blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    TaskJoin(String),
}

/// Top-level error type for the `Analyzer` API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzerError {
    /// Invalid analyzer configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The one-shot analysis call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
