//! Logging configuration with journald support on Linux.
//!
//! Background runs log to systemd's journal when available and fall back to
//! a daily rolling file. One-shot commands log to stderr.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter, e.g. `PHOTOSHELF_LOG=debug`.
pub const LOG_ENV: &str = "PHOTOSHELF_LOG";

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// journald on Linux, otherwise a rolling file in the given directory.
    Service { log_dir: Option<PathBuf> },
    /// Human-readable output on stderr.
    Stderr,
}

/// Initialize the global tracing subscriber.
///
/// The filter comes from `PHOTOSHELF_LOG` and defaults to `info`.
pub fn init(target: LogTarget) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = match target {
        LogTarget::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
            return Ok(());
        }
        LogTarget::Service { log_dir } => log_dir,
    };

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photoshelf")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "photoshelf.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer thread lives as long as the guard does.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
