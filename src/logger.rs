use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, anyhow};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Outcome label of a unit of work, written to the JSON events file.
pub trait RequestStatus {
    fn status(&self) -> &'static str;
}

impl<T, E> RequestStatus for Result<T, E> {
    fn status(&self) -> &'static str {
        match self {
            Ok(_) => "ok",
            Err(_) => "error",
        }
    }
}

/// Maps a user supplied level to an `EnvFilter` directive.
/// Unknown levels fall back to `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" => "error",
        "off" => "off",
        _ => "info",
    }
}

fn split_path(path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("log path `{}` has no file name", path.display()))?;
    Ok((dir, name))
}

/// Installs the global subscriber.
///
/// - `log_file` gets a daily rolling plain text log.
/// - `event_file` gets one JSON line per `request` event.
/// - stdout gets the same text log for interactive runs.
///
/// Both paths are relative to `root`.
pub fn init_tracing(
    root: &Path,
    log_file: &str,
    event_file: &str,
    log_level: &str,
) -> anyhow::Result<()> {
    let level = normalize_level(log_level);

    let (txt_dir, txt_name) = split_path(&root.join(log_file))?;
    let (json_dir, json_name) = split_path(&root.join(event_file))?;
    std::fs::create_dir_all(&txt_dir)
        .with_context(|| format!("creating log directory {}", txt_dir.display()))?;
    std::fs::create_dir_all(&json_dir)
        .with_context(|| format!("creating log directory {}", json_dir.display()))?;

    let txt_appender = RollingFileAppender::new(Rotation::DAILY, txt_dir, txt_name);
    let txt_layer = fmt::layer()
        .with_writer(txt_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(level));

    let json_appender = RollingFileAppender::new(Rotation::DAILY, json_dir, json_name);
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new("request=info"));

    let stdout_layer = fmt::layer()
        .with_thread_names(true)
        .with_filter(EnvFilter::new(level));

    Registry::default()
        .with(txt_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow!("could not install tracing subscriber: {e}"))?;

    Ok(())
}

/// Runs `handler`, then logs its latency and emits one `request` event
/// carrying the name, latency and status of the result.
pub async fn instrument_request<F, Fut, T>(name: &str, handler: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
    T: RequestStatus,
{
    let start = Instant::now();
    let result = handler().await;
    let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
    let status = result.status();

    info!("request `{}` finished ({}) in {} ms", name, status, elapsed);
    tracing::event!(
        target: "request",
        tracing::Level::INFO,
        request = name,
        latency_ms = elapsed,
        status = status,
    );

    result
}
