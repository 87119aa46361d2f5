//! Leveled diagnostic output.
//!
//! Thread-safe, optionally-flushing logging in the style of a kernel
//! printk. Each record carries the numeric thread id of its [`Log`]
//! context so reactor output (thread 0) and pool-worker output are
//! distinguishable in a single stream.
//!
//! # Environment Variables
//!
//! - `EVIO_LOG_LEVEL=<level>` - 0=off, 1=alert, 2=error, 3=warn,
//!   4=info, 5=debug, 6=trace (default: info)
//! - `EVIO_FLUSH_EPRINT=1` - Flush stderr after each record
//!
//! # Usage
//!
//! ```ignore
//! use evio_core::log::Log;
//! use evio_core::{ev_debug, ev_error};
//!
//! let log = Log::for_new_thread();
//! ev_debug!(log, "task #{} added to thread pool \"{}\"", id, name);
//! ev_error!(log, "queue overflow: {} tasks waiting", waiting);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Log levels, most severe first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Alert = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Alert,
            2 => LogLevel::Error,
            3 => LogLevel::Warn,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Alert => "[ALERT]",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Ids handed out to pool workers and other helper threads. The
/// reactor is always thread 0.
static THREAD_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Initialize from environment variables.
///
/// Called automatically on first use; call explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("EVIO_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("EVIO_LOG_LEVEL") {
        if let Ok(n) = val.parse::<u8>() {
            LOG_LEVEL.store(n.min(LogLevel::Trace as u8), Ordering::Relaxed);
        }
    }
}

/// Override the level programmatically (tests, binaries).
pub fn set_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Diagnostic context: a numeric thread id stamped on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Log {
    pub thread: u32,
}

impl Log {
    /// The reactor's context.
    pub const fn reactor() -> Log {
        Log { thread: 0 }
    }

    /// A fresh context with a process-unique thread id. Pool workers
    /// call this once at start so their records are attributable.
    pub fn for_new_thread() -> Log {
        Log {
            thread: THREAD_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Log::reactor()
    }
}

/// Emit one record. Use the `ev_*!` macros instead of calling this.
pub fn write_record(level: LogLevel, log: Log, args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{} [t{:02}] {}", level.prefix(), log.thread, args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[macro_export]
macro_rules! ev_log {
    ($level:expr, $log:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            $crate::log::write_record($level, $log, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! ev_alert {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Alert, $log, $($arg)*)
    };
}

#[macro_export]
macro_rules! ev_error {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Error, $log, $($arg)*)
    };
}

#[macro_export]
macro_rules! ev_warn {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Warn, $log, $($arg)*)
    };
}

#[macro_export]
macro_rules! ev_info {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Info, $log, $($arg)*)
    };
}

#[macro_export]
macro_rules! ev_debug {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Debug, $log, $($arg)*)
    };
}

#[macro_export]
macro_rules! ev_trace {
    ($log:expr, $($arg:tt)*) => {
        $crate::ev_log!($crate::log::LogLevel::Trace, $log, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Alert < LogLevel::Error);
        assert!(LogLevel::Debug < LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(2), LogLevel::Error);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Trace);
    }

    #[test]
    fn test_enabled_gate() {
        set_level(LogLevel::Warn);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Warn));
        assert!(!enabled(LogLevel::Debug));
        set_level(LogLevel::Info);
    }

    #[test]
    fn test_thread_ids_are_unique() {
        let a = Log::for_new_thread();
        let b = Log::for_new_thread();
        assert_ne!(a.thread, b.thread);
        assert_ne!(a.thread, 0);
        assert_eq!(Log::reactor().thread, 0);
    }
}
