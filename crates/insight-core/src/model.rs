use std::ops::Range;
use std::time::Duration;

use base64::Engine as _;

/// Default lifetime of a streaming connection.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Image handed to the analysis backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Raw uploaded bytes with their declared content type.
    Bytes { data: Vec<u8>, content_type: String },
    /// Remote image the backend fetches itself.
    Url(String),
}

impl ImageSource {
    /// Renders the image as a URL the backend accepts.
    ///
    /// Uploaded bytes become a `data:` URL, remote URLs pass through unchanged.
    pub fn to_url(&self) -> String {
        match self {
            Self::Bytes { data, content_type } => format!(
                "data:{};base64,{}",
                content_type,
                base64::engine::general_purpose::STANDARD.encode(data)
            ),
            Self::Url(url) => url.clone(),
        }
    }
}

/// One image + question pair submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub request_id: uuid::Uuid,
    pub image: ImageSource,
    pub question: String,
}

impl AnalysisRequest {
    /// Creates a request for uploaded image bytes.
    pub fn from_bytes(
        data: Vec<u8>,
        content_type: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            image: ImageSource::Bytes {
                data,
                content_type: content_type.into(),
            },
            question: question.into(),
        }
    }

    /// Creates a request for a remote image.
    pub fn from_url(url: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4(),
            image: ImageSource::Url(url.into()),
            question: question.into(),
        }
    }
}

/// Runtime knobs for a streaming analysis.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Deadline after which an unfinished channel times out.
    pub timeout: Duration,
    /// Delay window applied between consecutive result segments.
    ///
    /// An empty range disables pacing.
    pub pacing: Range<Duration>,
    /// Bounded event buffer between the orchestrator and the transport.
    pub buffer_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STREAM_TIMEOUT,
            pacing: Duration::from_millis(200)..Duration::from_millis(500),
            buffer_capacity: 128,
        }
    }
}

impl StreamOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pacing(mut self, pacing: Range<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Same options with pacing turned off.
    pub fn without_pacing(self) -> Self {
        self.pacing(Duration::ZERO..Duration::ZERO)
    }
}
