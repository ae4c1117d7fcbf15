use crate::errors::BackendError;
use crate::model::ImageSource;

/// Opaque analysis capability: image + question in, full text out.
///
/// Implementations are called once per request and are never retried by the
/// pipeline. A successful call must carry non-empty text; an empty answer is
/// reported as `BackendError::EmptyResult`.
#[async_trait::async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Analyses `image` with respect to `question`.
    async fn analyze(&self, image: &ImageSource, question: &str) -> Result<String, BackendError>;
}

/// Rejects blank backend answers so callers only ever see usable text.
pub(crate) fn require_text(text: String) -> Result<String, BackendError> {
    if text.trim().is_empty() {
        Err(BackendError::EmptyResult)
    } else {
        Ok(text)
    }
}
