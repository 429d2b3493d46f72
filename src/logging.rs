//! Console + per-run log file.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize tracing with a console layer and an append-only run log at
/// `<log_dir>/outreach_<YYYYmmdd_HHMMSS>.log`.
///
/// Uses `RUST_LOG` if set, otherwise `info`. The returned guard flushes the
/// file writer when dropped and must be held until the process exits.
pub fn init(log_dir: &Path) -> anyhow::Result<(WorkerGuard, PathBuf)> {
    std::fs::create_dir_all(log_dir)?;

    let file_name = run_log_name();
    let appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer),
        )
        .try_init()?;

    Ok((guard, log_dir.join(file_name)))
}

fn run_log_name() -> String {
    format!("outreach_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_name_is_timestamped() {
        let name = run_log_name();
        assert!(name.starts_with("outreach_"));
        assert!(name.ends_with(".log"));
        // outreach_ + YYYYmmdd_HHMMSS + .log
        assert_eq!(name.len(), "outreach_".len() + 15 + ".log".len());
    }
}
