//! Logging Infrastructure
//!
//! Structured logging setup with support for both development and production
//! environments. Features:
//! - Daily rotating application logs (deleted after 14 days)
//! - Permanent audit logs (never deleted)

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, prelude::*};

/// Clean up old application log files (older than 14 days)
///
/// Call this periodically (e.g., daily) to maintain log size
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<()> {
    use chrono::{Local, TimeZone};

    let cutoff = Local::now() - chrono::Duration::days(14);

    let app_log_dir = log_dir.join("app");
    if app_log_dir.exists() {
        for entry in fs::read_dir(app_log_dir)? {
            let entry = entry?;
            let path = entry.path();

            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && name.starts_with("app-")
                && name.ends_with(".log")
            {
                // Extract date from app-YYYY-MM-DD.log
                if let Some(date_part) = name
                    .strip_prefix("app-")
                    .and_then(|d| d.strip_suffix(".log"))
                    && let Ok(naive_date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                    && let Some(local_datetime) = Local
                        .from_local_datetime(&naive_date.and_hms_opt(0, 0, 0).unwrap())
                        .single()
                    && local_datetime < cutoff
                {
                    fs::remove_file(&path)?;
                    tracing::info!(file = %name, "Deleted old log file");
                }
            }
        }
    }

    Ok(())
}

fn prepare_dirs(dir: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let log_dir = Path::new(dir);
    fs::create_dir_all(log_dir)?;

    let app_log_dir = log_dir.join("app");
    let audit_log_dir = log_dir.join("audit");
    fs::create_dir_all(&app_log_dir)?;
    fs::create_dir_all(&audit_log_dir)?;
    Ok((app_log_dir, audit_log_dir))
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn")
/// * `json_format` - Whether to use JSON format (true for production)
/// * `log_dir` - Optional directory for file logging
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if json_format {
        // JSON format for production
        let console_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(EnvFilter::new(level));

        if let Some(dir) = log_dir {
            let (app_log_dir, audit_log_dir) = prepare_dirs(dir)?;

            // Standard application logs (rotated daily, 14-day cleanup)
            let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, "app");
            let app_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::sync::Mutex::new(app_log))
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() != "audit"
                }));

            // Permanent audit logs (never deleted)
            let audit_log = RollingFileAppender::new(Rotation::DAILY, audit_log_dir, "audit");
            let audit_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::sync::Mutex::new(audit_log))
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() == "audit"
                }));

            tokio::spawn(periodic_cleanup(PathBuf::from(dir)));

            subscriber
                .with(console_layer)
                .with(app_layer)
                .with(audit_layer)
                .init();
        } else {
            subscriber.with(console_layer).init();
        }
    } else {
        // Pretty format for development
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_filter(EnvFilter::new(level));

        if let Some(dir) = log_dir {
            let (app_log_dir, audit_log_dir) = prepare_dirs(dir)?;

            let app_log = RollingFileAppender::new(Rotation::DAILY, app_log_dir, "app");
            let app_layer = fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(app_log))
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() != "audit"
                }));

            let audit_log = RollingFileAppender::new(Rotation::DAILY, audit_log_dir, "audit");
            let audit_layer = fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(audit_log))
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() == "audit"
                }));

            tokio::spawn(periodic_cleanup(PathBuf::from(dir)));

            subscriber
                .with(console_layer)
                .with(app_layer)
                .with(audit_layer)
                .init();
        } else {
            subscriber.with(console_layer).init();
        }
    }

    Ok(())
}

/// Periodic cleanup task - runs every hour to clean old logs
async fn periodic_cleanup(log_dir: PathBuf) {
    use tokio::time::{Duration, sleep};

    loop {
        sleep(Duration::from_secs(3600)).await;

        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}

/// Initialize the logging system (console only)
///
/// Convenience function for console-only logging
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}

/// Audit log helper - records critical business operations
///
/// Audit logs are permanently stored in `audit-YYYY-MM-DD.log` files.
/// They are NEVER deleted, even after 14 days.
///
/// # Examples
/// ```no_run
/// # use hub_server::audit_log;
/// // Out-of-stock resolution
/// audit_log!("mario", "esaurito_resolve_split", "order:12345");
///
/// // Inventory reconciliation marker
/// audit_log!("mario", "esaurito_inventory_restore_failed", "product:789", "order:12345 qty:3");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($user_id:expr, $action:expr, $resource:expr) => {
        tracing::info!(
            target: "audit",
            user_id = %$user_id,
            action = %$action,
            resource = %$resource,
            timestamp = %chrono::Local::now().to_rfc3339(),
            "AUDIT"
        );
    };
    ($user_id:expr, $action:expr, $resource:expr, $details:expr) => {
        tracing::info!(
            target: "audit",
            user_id = %$user_id,
            action = %$action,
            resource = %$resource,
            details = %$details,
            timestamp = %chrono::Local::now().to_rfc3339(),
            "AUDIT"
        );
    };
}
