//! evio error types.

use std::fmt;

#[derive(Debug)]
pub enum EvioError {
    /// Offload queue is at `max_queue`; the submission was rejected.
    QueueOverflow { pool: String, waiting: i64 },
    /// The task is already owned by a pool.
    TaskActive(u64),
    /// The notify channel could not be created or signaled.
    NotifyUnavailable(i32),
    /// A driver operation failed. Carries the operation name and errno.
    DriverFailed(&'static str, i32),
    /// Semaphore operation failed with errno.
    SemFailed(i32),
    /// Worker thread could not be spawned.
    ThreadSpawn(std::io::Error),
    /// Signal mask could not be installed.
    SigmaskFailed(i32),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for EvioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueOverflow { pool, waiting } => {
                write!(f, "thread pool \"{}\" queue overflow: {} tasks waiting", pool, waiting)
            }
            Self::TaskActive(id) => write!(f, "task #{} already active", id),
            Self::NotifyUnavailable(e) => write!(f, "notify channel: errno {}", e),
            Self::DriverFailed(op, e) => write!(f, "{} failed: errno {}", op, e),
            Self::SemFailed(e) => write!(f, "semaphore: errno {}", e),
            Self::ThreadSpawn(e) => write!(f, "thread spawn failed: {}", e),
            Self::SigmaskFailed(e) => write!(f, "pthread_sigmask failed: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for EvioError {}

pub type Result<T> = std::result::Result<T, EvioError>;

/// Last errno of the calling thread.
pub fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
