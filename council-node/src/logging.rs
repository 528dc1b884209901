use std::{ffi::OsStr, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::filter_fn, prelude::*, EnvFilter};

const CONSENSUS_TARGET: &str = "consensus";

/// Installs the global subscriber.
///
/// Stdout gets everything `RUST_LOG` allows except the `consensus` target.
/// With `audit_log`, the `consensus` milestones go to that file instead. Keep
/// the returned guard alive until exit or buffered lines are lost.
pub fn init_logging(audit_log: Option<&Path>) -> Option<WorkerGuard> {
    let (audit_layer, guard) = match audit_log {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("council-audit.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter_fn(|metadata| metadata.target() == CONSENSUS_TARGET));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,council_node=debug".into()))
        .with_filter(filter_fn(|metadata| metadata.target() != CONSENSUS_TARGET));

    tracing_subscriber::registry().with(audit_layer).with(stdout_layer).init();
    guard
}

/// Default audit file name for today, e.g. `logs/council-20240131.log`.
pub fn default_audit_path() -> std::path::PathBuf {
    let day = chrono::Local::now().format("%Y%m%d");
    Path::new("logs").join(format!("council-{}.log", day))
}
