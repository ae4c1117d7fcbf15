use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use insight_core::vendors::dashscope::DashScopeBackend;
use insight_core::{Analyzer, HistoryRecorder, RecordSink, init_observability};
use insight_server::{AppState, ServerConfig, config, create_router};
use insight_store::{MemoryRecordStore, SqliteRecordStore};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();
    init_observability();
    let config = ServerConfig::parse();

    let backend = DashScopeBackend::from_env().context("failed to configure DashScope backend")?;
    info!(model = backend.model(), "analysis backend ready");

    let sink: Arc<dyn RecordSink> = if config.in_memory {
        info!("history kept in memory");
        Arc::new(MemoryRecordStore::new())
    } else {
        Arc::new(
            SqliteRecordStore::open(&config.db_path)
                .with_context(|| format!("failed to open {}", config.db_path.display()))?,
        )
    };

    let analyzer = Analyzer::builder()
        .backend(Arc::new(backend))
        .options(config.stream_options())
        .build()?;
    let state = AppState::new(analyzer, HistoryRecorder::new(sink), config.max_upload_bytes);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "insight-server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("insight-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
