use std::time::Duration;

use crate::errors::BackendError;

pub(crate) const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode";
pub(crate) const DEFAULT_MODEL: &str = "qwen-vl-max-latest";
pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Configuration for the DashScope backend.
#[derive(Clone, Debug)]
pub struct DashScopeConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Vision model name.
    pub model: String,
    /// System prompt sent ahead of every question.
    pub system_prompt: String,
    /// HTTP timeout for one analysis call.
    pub timeout: Duration,
}

impl DashScopeConfig {
    /// Creates a config with defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `DASHSCOPE_API_KEY`, honouring `INSIGHT_MODEL`
    /// and `INSIGHT_BACKEND_BASE_URL` when set.
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var("DASHSCOPE_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(BackendError::Config(
                "missing DASHSCOPE_API_KEY for DashScope backend".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("INSIGHT_MODEL")
            && !model.trim().is_empty()
        {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("INSIGHT_BACKEND_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_ignores_trailing_slash() {
        let config = DashScopeConfig::new("k").base_url("http://localhost:9000/");
        assert_eq!(
            config.chat_completions_url(),
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(DashScopeConfig::new("k").model, "qwen-vl-max-latest");
    }
}
