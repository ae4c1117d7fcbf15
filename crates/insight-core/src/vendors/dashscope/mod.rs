//! DashScope vision backend over the OpenAI-compatible chat-completions API.
//!
//! Requests carry one system message and one user message made of an image
//! part and a text part; the first choice's message content is the analysis.
mod adapter;
mod config;

pub use adapter::DashScopeBackend;
pub use config::DashScopeConfig;
