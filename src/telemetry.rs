//! Logging bootstrap.
//!
//! `EnvFilter`-driven subscriber with a rolling-daily file appender under
//! the data directory, falling back to stderr if that directory can't be
//! created. The returned guard must be held for the process lifetime —
//! dropping it stops the non-blocking writer from flushing.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(data_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env("VOICE_CORE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match std::fs::create_dir_all(data_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(data_dir, "voice-core.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_target(true)
                .init();
            Some(guard)
        }
        Err(e) => {
            fmt().with_env_filter(filter).init();
            tracing::warn!(
                "could not create log directory {}: {e} — logging to stderr",
                data_dir.display()
            );
            None
        }
    }
}
