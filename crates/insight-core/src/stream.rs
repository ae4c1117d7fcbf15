use std::fmt;

/// Pipeline stage reported by `StreamEvent::Progress`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    Processing,
    Analyzing,
}

impl Stage {
    /// Wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Processing => "processing",
            Self::Analyzing => "analyzing",
        }
    }

    /// Progress percentage announced when the stage begins.
    pub fn percent(&self) -> u8 {
        match self {
            Self::Start => 10,
            Self::Processing => 30,
            Self::Analyzing => 60,
        }
    }

    /// User-facing progress message for the stage.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Start => "开始处理图片...",
            Self::Processing => "正在处理图片数据...",
            Self::Analyzing => "AI正在分析图片...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame delivered to a streaming client.
///
/// Serialised as `{"type": "progress" | "stream" | "result" | "error", ...}`.
/// For a single request, any number of `Progress`/`Content` events is followed
/// by exactly one terminal `Result` or `Error`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Stage transition with a progress percentage.
    Progress {
        stage: Stage,
        message: String,
        percent: u8,
    },
    /// Incremental text: notices and result segments.
    #[serde(rename = "stream")]
    Content { content: String },
    /// Terminal success event carrying the full, unsegmented text.
    Result { result: String },
    /// Terminal failure event.
    Error { message: String },
}

impl StreamEvent {
    /// Progress event for the given stage with its standard message and percentage.
    pub fn progress(stage: Stage) -> Self {
        Self::Progress {
            stage,
            message: stage.message().to_string(),
            percent: stage.percent(),
        }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    pub fn result(text: impl Into<String>) -> Self {
        Self::Result {
            result: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns true for `Result` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }

    /// Wire `type` tag of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Content { .. } => "stream",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
        }
    }
}
