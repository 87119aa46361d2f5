//! # evio-pool — Offload thread pools
//!
//! Blocking work must never run on the reactor; it is posted here. A
//! pool is a named set of worker threads sharing a counting semaphore,
//! an intake queue and a completion queue (both intrusive lock-free
//! linked queues), and a notify channel that wakes the reactor when a
//! task finishes.
//!
//! Data flow:
//!
//! 1. A handler on the reactor builds a [`Task`] and posts it
//!    ([`ThreadPool::post`]).
//! 2. A worker dequeues it, runs the task handler (which may block),
//!    pushes the task onto the completion queue and signals the notify
//!    channel.
//! 3. The notify event fires on the reactor; the completion drain
//!    marks each task's event `complete`/inactive and invokes its
//!    completion handler there.
//!
//! Pools are declared with the `thread_pool NAME threads=N
//! max_queue=M` directive ([`conf`]) and instantiated at worker start.

pub mod conf;
pub mod pool;
pub mod queue;
pub mod semaphore;
pub mod task;

pub use conf::{ConfigError, PoolRegistry, PoolSet};
pub use pool::{PostError, ThreadPool};
pub use semaphore::Semaphore;
pub use task::{Task, TaskHandler};

/// Pool auto-provided when the configuration names none.
pub const DEFAULT_POOL_NAME: &str = "default";
pub const DEFAULT_THREADS: usize = 32;
pub const DEFAULT_MAX_QUEUE: i64 = 65536;
