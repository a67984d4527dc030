use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV: &str = "NUTRILOG_LOG";
pub const DEFAULT_FILTER: &str = "nutrilog=info,sqlx=warn";
pub const LOG_FILE_NAME: &str = "nutrilog.log";

fn env_filter() -> EnvFilter {
    let directive = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install JSON logging to stdout. Calling it again is a no-op.
pub fn init() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .try_init();
}

/// Install stdout logging plus a daily rolling JSON file in `log_dir`, with
/// `log` records bridged in.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for as long as logging is wanted.
pub fn init_with_file(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let stdout = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());
    let file = fmt::layer()
        .json()
        .with_target(true)
        .with_ansi(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout)
        .with(file);
    tracing::subscriber::set_global_default(subscriber).context("install tracing subscriber")?;
    let _ = tracing_log::LogTracer::init();
    Ok(guard)
}
