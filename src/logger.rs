// Leveled, colored logging for the provisioning run.
//
// Log lines go to stderr so that the provisioning report on stdout stays clean
// and can be piped. Debug lines are gated by `--debug`, info lines can be
// silenced with `--quiet`; warnings and errors are always printed.

use colored::*;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// `log_info!` for run progress (entry started, entry installed, ...).
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if !$crate::logger::is_quiet() {
            eprintln!("{} {}", "[INFO]".bright_green(), format!($($arg)*))
        }
    };
}

/// `log_warn!` for recoverable conditions: a retried fetch, a failed cache cleanup.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => (eprintln!("{} {}", "[WARN]".bright_yellow(), format!($($arg)*)));
}

/// `log_error!` for entry failures.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => (eprintln!("{} {}", "[ERROR]".bright_red(), format!($($arg)*)));
}

/// `log_debug!` for step-by-step tracing, printed only after `init(true, _)`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logger::is_debug_enabled() {
           eprintln!("{} {}", "[DEBUG]".dimmed(), format!($($arg)*));
        }
    };
}

static DEBUG_ENABLED: OnceLock<AtomicBool> = OnceLock::new();
static QUIET: OnceLock<AtomicBool> = OnceLock::new();

/// Initializes the logger. Call once at startup, before the first log line.
///
/// `debug` wins over `quiet` when both are set.
pub fn init(debug: bool, quiet: bool) {
    DEBUG_ENABLED
        .get_or_init(|| AtomicBool::new(debug))
        .store(debug, Ordering::Relaxed);
    QUIET
        .get_or_init(|| AtomicBool::new(quiet && !debug))
        .store(quiet && !debug, Ordering::Relaxed);

    log_debug!("[Logger] Initialized in DEBUG mode");
}

pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED
        .get()
        .map(|f| f.load(Ordering::Relaxed))
        .unwrap_or(false)
}

pub fn is_quiet() -> bool {
    QUIET.get().map(|f| f.load(Ordering::Relaxed)).unwrap_or(false)
}
