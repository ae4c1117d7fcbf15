use tracing::debug;

use crate::backend::AnalysisBackend;
use crate::errors::BackendError;
use crate::model::ImageSource;

use super::config::DashScopeConfig;

const BACKEND_NAME: &str = "dashscope";

/// `AnalysisBackend` calling a DashScope vision model.
pub struct DashScopeBackend {
    client: reqwest::Client,
    config: DashScopeConfig,
}

impl DashScopeBackend {
    /// Creates a backend from explicit configuration.
    pub fn new(config: DashScopeConfig) -> Result<Self, BackendError> {
        if config.api_key.trim().is_empty() {
            return Err(BackendError::Config(
                "DashScope config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a backend using `DASHSCOPE_API_KEY`.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::new(DashScopeConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for DashScopeBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn analyze(&self, image: &ImageSource, question: &str) -> Result<String, BackendError> {
        let body = build_request_body(&self.config, image, question);
        debug!(model = %self.config.model, "calling DashScope chat completions");

        let response = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::transport(format!("DashScope request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::provider(
                format!("DashScope request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::protocol(format!("invalid DashScope response: {e}")))?;
        extract_answer(&value)
    }
}

pub(crate) fn build_request_body(
    config: &DashScopeConfig,
    image: &ImageSource,
    question: &str,
) -> serde_json::Value {
    serde_json::json!({
        "model": config.model,
        "messages": [
            {
                "role": "system",
                "content": config.system_prompt,
            },
            {
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": image.to_url() } },
                    { "type": "text", "text": question },
                ],
            },
        ],
    })
}

/// Pulls the first choice's text out of a chat-completions response.
///
/// Content may be a plain string or an array of `{type: "text", text}` parts.
pub(crate) fn extract_answer(value: &serde_json::Value) -> Result<String, BackendError> {
    if let Some(message) = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
    {
        return Err(BackendError::provider(message, None));
    }
    let content = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| BackendError::protocol("response has no choices[0].message.content"))?;

    let text = match content {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        serde_json::Value::Null => String::new(),
        other => {
            return Err(BackendError::protocol(format!(
                "unexpected content shape: {other}"
            )));
        }
    };
    if text.trim().is_empty() {
        return Err(BackendError::EmptyResult);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_image_then_question() {
        let config = DashScopeConfig::new("k");
        let image = ImageSource::Url("https://example.com/dog.jpeg".into());
        let body = build_request_body(&config, &image, "图中描绘的是什么景象?");

        assert_eq!(body["model"], "qwen-vl-max-latest");
        assert_eq!(body["messages"][0]["role"], "system");
        let user = &body["messages"][1]["content"];
        assert_eq!(user[0]["image_url"]["url"], "https://example.com/dog.jpeg");
        assert_eq!(user[1]["text"], "图中描绘的是什么景象?");
    }

    #[test]
    fn extracts_string_and_part_array_content() {
        let plain = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "一只狗。" } }]
        });
        assert_eq!(extract_answer(&plain).expect("plain"), "一只狗。");

        let parts = serde_json::json!({
            "choices": [{ "message": { "content": [{ "text": "一只" }, { "text": "狗。" }] } }]
        });
        assert_eq!(extract_answer(&parts).expect("parts"), "一只狗。");
    }

    #[test]
    fn missing_or_empty_content_is_an_error() {
        let empty = serde_json::json!({ "choices": [{ "message": { "content": "" } }] });
        assert_eq!(extract_answer(&empty), Err(BackendError::EmptyResult));

        let shapeless = serde_json::json!({ "choices": [] });
        assert!(matches!(
            extract_answer(&shapeless),
            Err(BackendError::Protocol(_))
        ));

        let failed = serde_json::json!({ "error": { "message": "Invalid API-key provided." } });
        assert!(matches!(
            extract_answer(&failed),
            Err(BackendError::Provider { .. })
        ));
    }

    #[test]
    fn rejects_blank_api_key() {
        assert!(matches!(
            DashScopeBackend::new(DashScopeConfig::new("  ")),
            Err(BackendError::Config(_))
        ));
    }

    #[tokio::test]
    async fn env_gated_smoke_analyze_if_key_present() {
        if std::env::var("DASHSCOPE_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping DashScope smoke test (DASHSCOPE_API_KEY missing)");
            return;
        }
        let backend = DashScopeBackend::from_env().expect("backend");
        let image = ImageSource::Url(crate::analyzer::DEFAULT_IMAGE_URL.into());
        let result = backend.analyze(&image, "图中描绘的是什么景象?").await;
        assert!(result.is_ok(), "DashScope smoke failed: {result:?}");
    }
}
