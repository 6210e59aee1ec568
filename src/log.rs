//! Leveled-logging façade.
//!
//! The core uses its own 8-level scheme (`0=ALWAYS` through `7=VVERB`),
//! which doesn't map onto `tracing`'s five fixed levels. [`Level`] is
//! that scheme; [`init`] installs a `tracing-subscriber` pipeline
//! filtered to the configured `log_level`, with every call-site still
//! going through normal `tracing::{error,warn,info,debug,trace}!` macros
//! underneath.

use crate::option::Options;
use tracing_appender::non_blocking::WorkerGuard;

/// The core's own log level scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Bypasses the level filter entirely — always emitted.
    Always = 0,
    Crit = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Verb = 6,
    Vverb = 7,
}

impl Level {
    fn from_u64(v: u64) -> Level {
        match v {
            0 => Level::Always,
            1 => Level::Crit,
            2 => Level::Error,
            3 => Level::Warn,
            4 => Level::Info,
            5 => Level::Debug,
            6 => Level::Verb,
            _ => Level::Vverb,
        }
    }

    fn as_tracing_filter(self) -> &'static str {
        match self {
            Level::Always | Level::Crit | Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Verb | Level::Vverb => "trace",
        }
    }
}

/// Handle kept alive for the lifetime of the process when logging to a
/// file; dropping it stops the background flush thread. Logging to
/// stderr needs no guard, so [`init`] returns `None` in that case.
pub struct LogGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Initializes the global `tracing` subscriber from `log_level` /
/// `log_name`. `log_name` absent means stderr.
///
/// Idempotent-ish: `tracing`'s global subscriber can only be set once
/// per process; a second call is a no-op (the error from
/// `try_init` is swallowed) rather than a panic, since tests in this
/// crate may each want logging initialized.
pub fn init(options: &Options) -> LogGuard {
    let level = Level::from_u64(options.log_level);
    let filter = tracing_subscriber::EnvFilter::new(level.as_tracing_filter());

    match &options.log_name {
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            LogGuard(None)
        }
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("ccommon-core.log"));

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();

            LogGuard(Some(guard))
        }
    }
}

/// Logs at `CRIT` and aborts the process, matching `cc_log.h`'s `panic`
/// variant: a programming-error invariant violation that has no
/// recovery path.
#[macro_export]
macro_rules! cc_panic {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        std::process::abort();
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_u64_clamps_high_values() {
        assert_eq!(Level::from_u64(0), Level::Always);
        assert_eq!(Level::from_u64(4), Level::Info);
        assert_eq!(Level::from_u64(99), Level::Vverb);
    }
}
