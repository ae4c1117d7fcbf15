use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use insight_core::StreamOptions;

/// Loads `.env` from the crate directory, then from the working directory.
pub fn load_env() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Command-line options; each falls back to an environment variable.
#[derive(Clone, Debug, Parser)]
#[command(name = "insight-server", version, about = "Image analysis HTTP server")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "INSIGHT_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// SQLite file holding analysis history.
    #[arg(long, env = "INSIGHT_DB_PATH", default_value = "insight_history.db")]
    pub db_path: PathBuf,

    /// Keep history in memory instead of SQLite.
    #[arg(long, env = "INSIGHT_IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,

    /// Lifetime of a streaming connection, in milliseconds.
    #[arg(long, env = "INSIGHT_STREAM_TIMEOUT_MS", default_value_t = 300_000)]
    pub stream_timeout_ms: u64,

    /// Largest accepted image upload, in bytes.
    #[arg(long, env = "INSIGHT_MAX_UPLOAD_BYTES", default_value_t = 5 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::default().timeout(Duration::from_millis(self.stream_timeout_ms))
    }
}
