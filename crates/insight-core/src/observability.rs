use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_VAR: &str = "INSIGHT_OBSERVABILITY_ENABLED";
const LEVEL_VAR: &str = "INSIGHT_LOG_LEVEL";
const JSON_LOG_PATH_VAR: &str = "INSIGHT_JSON_LOG_PATH";

/// Filter used when neither `INSIGHT_LOG_LEVEL` nor `RUST_LOG` is usable.
/// `tower_http::trace` reports requests and responses at debug.
const DEFAULT_DIRECTIVES: &str = "info,tower_http=debug";
const DEFAULT_LOG_FILE: &str = "insight.logs.jsonl";

#[derive(Debug, PartialEq, Eq)]
enum LogOutput {
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogOutput {
    fn from_path(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::Console;
        };
        let path = Path::new(raw);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(DEFAULT_LOG_FILE)
            .to_string();
        Self::JsonFile { dir, file_name }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn env_filter() -> EnvFilter {
    std::env::var(LEVEL_VAR)
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn json_appender(dir: &Path, file_name: &str) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create log directory {}: {e}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| format!("cannot open log file {}: {e}", dir.join(file_name).display()))
}

/// Installs the global tracing subscriber once per process.
///
/// - `INSIGHT_OBSERVABILITY_ENABLED`: set to a false-like value to disable logging.
/// - `INSIGHT_LOG_LEVEL`: filter directives; falls back to `RUST_LOG`, then
///   `info,tower_http=debug`.
/// - `INSIGHT_JSON_LOG_PATH`: write JSONL (with the active request span) to this
///   file instead of compact stdout output. If the file cannot be created the
///   error goes to stderr and logging stays on stdout.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let enabled = std::env::var(ENABLED_VAR)
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);
        if !enabled {
            return;
        }

        let filter = env_filter();
        let output = LogOutput::from_path(std::env::var(JSON_LOG_PATH_VAR).ok().as_deref());
        if let LogOutput::JsonFile { dir, file_name } = output {
            match json_appender(&dir, &file_name) {
                Ok(writer) => {
                    let json_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_writer(writer);
                    let _ = tracing_subscriber::registry()
                        .with(filter)
                        .with(json_layer)
                        .try_init();
                    return;
                }
                Err(err) => eprintln!("insight: {err}; logging to stdout"),
            }
        }

        let console_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stdout);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flag_values() {
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("disabled"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn log_path_selects_output() {
        assert_eq!(LogOutput::from_path(None), LogOutput::Console);
        assert_eq!(LogOutput::from_path(Some("  ")), LogOutput::Console);
        assert_eq!(
            LogOutput::from_path(Some("logs/insight.jsonl")),
            LogOutput::JsonFile {
                dir: PathBuf::from("logs"),
                file_name: "insight.jsonl".into(),
            }
        );
        assert_eq!(
            LogOutput::from_path(Some("server.jsonl")),
            LogOutput::JsonFile {
                dir: PathBuf::from("."),
                file_name: "server.jsonl".into(),
            }
        );
    }

    #[test]
    fn json_appender_creates_missing_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("nested").join("logs");
        assert!(json_appender(&dir, "insight.jsonl").is_ok());
        assert!(dir.is_dir());
    }

    #[test]
    fn json_appender_reports_unusable_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").expect("write");
        let err = json_appender(&blocker, "insight.jsonl").expect_err("file in the way");
        assert!(err.contains("cannot create log directory"), "{err}");
    }
}
