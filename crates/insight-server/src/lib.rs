//! HTTP surface for image analysis.
//!
//! Routes live under `/api/ai`: one-shot analysis, SSE streaming analysis and
//! history management.

pub mod api;
pub mod config;
pub mod error;
pub mod state;

pub use api::create_router;
pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;
