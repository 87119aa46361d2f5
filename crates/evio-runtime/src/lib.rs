//! # evio-runtime
//!
//! Platform machinery for the evio event core.
//!
//! This crate provides:
//! - The per-worker [`Reactor`](reactor::Reactor): one driver, one
//!   timer set, one posted queue, one thread
//! - Readiness helpers (`handle_read` and friends) encoding the
//!   capability-driven (de)registration policy
//! - The epoll (edge-triggered) and poll (level-triggered) drivers
//! - The eventfd notify channel for cross-thread wake-ups
//! - Signal masking for offload threads
//! - Process-role gating for worker lifecycle

pub mod notify;
pub mod posted;
pub mod reactor;
mod readiness;
pub mod signal;
pub mod timer;
pub mod worker;

#[cfg(unix)]
pub mod poll;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
        pub use epoll::EpollDriver;
    }
}

pub use notify::{NotifyChannel, NotifySignal};
#[cfg(unix)]
pub use poll::PollDriver;
pub use reactor::Reactor;
pub use worker::ProcessRole;
