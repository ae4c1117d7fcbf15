//! Concrete `AnalysisBackend` implementations.

/// DashScope (OpenAI-compatible) vision chat backend.
pub mod dashscope;
