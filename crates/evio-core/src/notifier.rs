//! Cross-thread wake abstraction.
//!
//! A `Notifier` wakes the reactor thread when another thread has
//! published work for it — in the offload subsystem, when a pool
//! worker has pushed a finished task onto the completion queue.
//!
//! # Implementors
//!
//! - `NotifySignal` (evio-runtime, default): writes 1 to an eventfd the
//!   reactor polls. Simple, coalescing by construction.
//! - A self-pipe variant slots in for kernels without eventfd.

use crate::error::Result;

/// Wakes the reactor when cross-thread work is pending.
///
/// **Contract:**
/// - `notify()` must never block and must be async-signal-safe.
/// - Multiple calls before the reactor wakes may be coalesced into a
///   single wake-up (eventfd counter semantics).
/// - The call must establish a happens-before edge from every store
///   made before it to the reactor's loads after the wake.
pub trait Notifier: Send + Sync {
    /// Signal that work is pending on the reactor.
    fn notify(&self) -> Result<()>;
}
