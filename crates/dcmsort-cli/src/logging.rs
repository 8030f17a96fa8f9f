use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/dcmsort.log";

/// Install stdout and file logging. Keep the returned guard alive until exit
/// so buffered file output is flushed.
///
/// `TRACING_LEVEL` sets the filter (default `info`), `LOG_FILE_PATH` the log
/// file (default `./logs/dcmsort.log`).
pub fn init_logger() -> WorkerGuard {
    let filter_layer = EnvFilter::try_new(
        env::var("TRACING_LEVEL").unwrap_or_else(|_| DEFAULT_LEVEL.to_string()),
    )
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let log_file = PathBuf::from(
        env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string()),
    );
    let (log_dir, log_name) = split_log_path(&log_file);
    // rolling::never creates the file but not its directory
    let _ = std::fs::create_dir_all(&log_dir);
    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, &log_name));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    info!("Logging to stdout and {}", log_file.display());

    guard
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dcmsort.log".to_string());
    (dir, name)
}
