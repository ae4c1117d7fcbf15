use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{AnalysisBackend, require_text};
use crate::channel::{EventChannel, EventReceiver};
use crate::errors::AnalyzerError;
use crate::model::{AnalysisRequest, ImageSource, StreamOptions};
use crate::orchestrator::{CompletionCallback, StreamOrchestrator};

/// Sample image analysed by the default analysis.
pub const DEFAULT_IMAGE_URL: &str = "https://help-static-aliyun-doc.aliyuncs.com/file-manage-files/zh-CN/20241022/emyrja/dog_and_girl.jpeg";
/// Question asked by the default analysis.
pub const DEFAULT_QUESTION: &str = "图中描绘的是什么景象?";
/// Question used for uploads that do not carry one.
pub const DEFAULT_UPLOAD_QUESTION: &str = "请分析这张图片";

struct AnalyzerInner {
    backend: Arc<dyn AnalysisBackend>,
    options: StreamOptions,
    orchestrator: StreamOrchestrator,
}

/// Entry point for one-shot and streaming analyses.
#[derive(Clone)]
pub struct Analyzer {
    inner: Arc<AnalyzerInner>,
}

impl Analyzer {
    /// Starts a builder for configuring the backend and stream options.
    pub fn builder() -> AnalyzerBuilder {
        AnalyzerBuilder::default()
    }

    pub fn options(&self) -> &StreamOptions {
        &self.inner.options
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Calls the backend directly and returns the full text, bypassing the
    /// staged pipeline.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalyzerError> {
        validate(request)?;
        debug!(request_id = %request.request_id, backend = self.backend_name(), "one-shot analysis");
        let text = self
            .inner
            .backend
            .analyze(&request.image, &request.question)
            .await
            .and_then(require_text)?;
        Ok(text)
    }

    /// Analyses the bundled sample image with the default question.
    pub async fn analyze_default(&self) -> Result<String, AnalyzerError> {
        self.analyze(&AnalysisRequest::from_url(DEFAULT_IMAGE_URL, DEFAULT_QUESTION))
            .await
    }

    /// Validates the request, opens an event channel and starts the staged
    /// sequence on a background task.
    ///
    /// Returns as soon as the channel is open; `callback` runs exactly once
    /// when the sequence ends, whatever the outcome.
    pub fn start_stream(
        &self,
        request: AnalysisRequest,
        callback: CompletionCallback,
    ) -> Result<EventReceiver, AnalyzerError> {
        validate(&request)?;
        let options = &self.inner.options;
        let (channel, receiver) = EventChannel::open(options.timeout, options.buffer_capacity);
        info!(
            request_id = %request.request_id,
            channel_id = %channel.id(),
            timeout_ms = options.timeout.as_millis() as u64,
            "streaming analysis started"
        );
        self.inner.orchestrator.spawn(request, channel, callback);
        Ok(receiver)
    }
}

fn validate(request: &AnalysisRequest) -> Result<(), AnalyzerError> {
    if request.question.trim().is_empty() {
        return Err(AnalyzerError::Validation("question must not be empty".into()));
    }
    match &request.image {
        ImageSource::Bytes { data, .. } if data.is_empty() => {
            Err(AnalyzerError::Validation("image must not be empty".into()))
        }
        ImageSource::Url(url) if url.trim().is_empty() => {
            Err(AnalyzerError::Validation("image url must not be empty".into()))
        }
        _ => Ok(()),
    }
}

/// Builder used to assemble an `Analyzer`.
#[derive(Default)]
pub struct AnalyzerBuilder {
    backend: Option<Arc<dyn AnalysisBackend>>,
    options: StreamOptions,
}

impl AnalyzerBuilder {
    /// Sets the analysis backend.
    pub fn backend(mut self, backend: Arc<dyn AnalysisBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replaces the stream options.
    pub fn options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the analyzer and validates its configuration.
    pub fn build(self) -> Result<Analyzer, AnalyzerError> {
        let backend = self
            .backend
            .ok_or_else(|| AnalyzerError::Config("an analysis backend is required".into()))?;
        if self.options.timeout.is_zero() {
            return Err(AnalyzerError::Config(
                "stream timeout must be greater than 0".into(),
            ));
        }
        if self.options.buffer_capacity == 0 {
            return Err(AnalyzerError::Config(
                "buffer_capacity must be greater than 0".into(),
            ));
        }
        let orchestrator = StreamOrchestrator::new(backend.clone(), self.options.pacing.clone());
        Ok(Analyzer {
            inner: Arc::new(AnalyzerInner {
                backend,
                options: self.options,
                orchestrator,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendError;
    use crate::stream::StreamEvent;
    use std::time::Duration;

    struct EchoBackend;

    #[async_trait::async_trait]
    impl AnalysisBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn analyze(&self, image: &ImageSource, question: &str) -> Result<String, BackendError> {
            match image {
                ImageSource::Url(url) if url == "bad" => Err(BackendError::transport("unreachable")),
                ImageSource::Url(url) => Ok(format!("{question}@{url}")),
                ImageSource::Bytes { data, .. } => Ok(format!("{question}:{}字节", data.len())),
            }
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::builder()
            .backend(Arc::new(EchoBackend))
            .options(StreamOptions::default().without_pacing())
            .build()
            .expect("analyzer")
    }

    #[test]
    fn build_requires_backend_and_positive_limits() {
        assert!(matches!(
            Analyzer::builder().build(),
            Err(AnalyzerError::Config(msg)) if msg.contains("backend")
        ));
        assert!(matches!(
            Analyzer::builder()
                .backend(Arc::new(EchoBackend))
                .options(StreamOptions::default().buffer_capacity(0))
                .build(),
            Err(AnalyzerError::Config(msg)) if msg.contains("buffer_capacity")
        ));
        assert!(matches!(
            Analyzer::builder()
                .backend(Arc::new(EchoBackend))
                .options(StreamOptions::default().timeout(Duration::ZERO))
                .build(),
            Err(AnalyzerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn one_shot_analysis_returns_backend_text_or_error() {
        let analyzer = analyzer();
        assert_eq!(
            analyzer.analyze_default().await.expect("default"),
            format!("{DEFAULT_QUESTION}@{DEFAULT_IMAGE_URL}")
        );
        assert!(matches!(
            analyzer.analyze(&AnalysisRequest::from_url("bad", "q")).await,
            Err(AnalyzerError::Backend(BackendError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn rejects_blank_question_and_empty_image() {
        let analyzer = analyzer();
        assert!(matches!(
            analyzer.analyze(&AnalysisRequest::from_url("u", "  ")).await,
            Err(AnalyzerError::Validation(_))
        ));
        let empty = AnalysisRequest::from_bytes(Vec::new(), "image/png", "q");
        assert!(matches!(
            analyzer.start_stream(empty, Box::new(|_| {})),
            Err(AnalyzerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn start_stream_returns_open_receiver_that_ends_with_result() {
        let analyzer = analyzer();
        let receiver = analyzer
            .start_stream(
                AnalysisRequest::from_bytes(b"abcd".to_vec(), "image/png", "描述"),
                Box::new(|_| {}),
            )
            .expect("start");
        let events = receiver.collect().await;
        assert_eq!(events.last(), Some(&StreamEvent::result("描述:4字节")));
    }
}
