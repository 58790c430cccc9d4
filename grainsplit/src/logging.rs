use std::path::Path;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Log to stderr (filterable with `RUST_LOG`) and, more verbosely, to a file.
/// The returned guard must stay alive for the file writer to flush.
pub fn init_logging(
    stderr_level: LevelFilter,
    log_file: &Path,
    file_level: LevelFilter,
) -> Result<WorkerGuard> {
    let directory = match log_file.parent() {
        Some(parent) if parent != Path::new("") => parent,
        _ => Path::new("."),
    };
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log file path {} has no file name", log_file.display()))?;
    grainsplit_core::create_dir!(directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(file_level);
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(stderr_level.into())
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
