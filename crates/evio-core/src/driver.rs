//! Readiness driver abstraction.
//!
//! A `Driver` is the uniform surface over one kernel notification
//! mechanism. The reactor owns exactly one; everything above it calls
//! the nine operations below and branches on [`Caps`], never on the
//! concrete type.
//!
//! # Implementors
//!
//! - `EpollDriver` (evio-runtime, default on Linux): edge-triggered,
//!   greedy, instance-filtered.
//! - `PollDriver` (evio-runtime): level-triggered with oneshot
//!   emulation; the portable fallback.
//!
//! Completion-port, real-time-signal and kernel-AIO backends slot in
//! through the same trait; their capability bits are already defined.

use crate::caps::Caps;
use crate::error::Result;
use crate::event::{Conn, Event};

/// The direction a registration covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Per-operation flags for `add`/`del`/`enable`/`disable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpFlags(u32);

impl OpFlags {
    /// The file is about to be closed: the driver must flush any
    /// pending removal instead of issuing one.
    pub const CLOSE_EVENT: OpFlags = OpFlags(0x0001);
    pub const DISABLE_EVENT: OpFlags = OpFlags(0x0002);
    pub const LOWAT_EVENT: OpFlags = OpFlags(0x0004);
    pub const VNODE_EVENT: OpFlags = OpFlags(0x0008);

    /// Filter-mode triad. A caller passes at most one; drivers that do
    /// not distinguish modes ignore them.
    pub const LEVEL: OpFlags = OpFlags(0x0100);
    pub const ONESHOT: OpFlags = OpFlags(0x0200);
    pub const CLEAR: OpFlags = OpFlags(0x0400);

    pub const fn empty() -> OpFlags {
        OpFlags(0)
    }

    #[inline]
    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpFlags {
    type Output = OpFlags;

    fn bitor(self, rhs: OpFlags) -> OpFlags {
        OpFlags(self.0 | rhs.0)
    }
}

/// What one `process` cycle saw. Tests and observability hooks read
/// this; calling code is free to ignore it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStats {
    /// Notifications returned by the kernel wait.
    pub events: usize,
    /// Handlers actually invoked.
    pub dispatched: usize,
    /// Notifications dropped as stale (instance mismatch, closed fd).
    pub stale: usize,
}

/// One readiness backend.
///
/// **Contract:**
/// - `add` must not be called for an `active` event, `del` only for an
///   `active` one; the driver sets/clears `active` itself.
/// - Events passed to `add`/`del` must have `data` pointing at their
///   owning [`Conn`], which must stay put while registered.
/// - `process` performs one kernel wait, validates staleness where the
///   capability word advertises `INSTANCE`, clears `active` for
///   consumed (oneshot) filters *before* the handler runs, and invokes
///   handlers synchronously on the calling (reactor) thread.
/// - An `Err` from `add`/`del` is fatal for the affected connection; an
///   `Err` from `process` is fatal for the worker.
pub trait Driver {
    /// Capability word. Written once at construction.
    fn caps(&self) -> Caps;

    fn add(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()>;

    fn del(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()>;

    fn enable(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()> {
        self.add(ev, dir, flags)
    }

    fn disable(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()> {
        self.del(ev, dir, flags)
    }

    /// Batched registration of both directions. Drivers with a cheaper
    /// combined form override this.
    fn add_conn(&self, conn: &mut Conn) -> Result<()> {
        self.add(&mut conn.read, Direction::Read, OpFlags::empty())?;
        self.add(&mut conn.write, Direction::Write, OpFlags::empty())
    }

    fn del_conn(&self, conn: &mut Conn, flags: OpFlags) -> Result<()> {
        if conn.read.active() {
            self.del(&mut conn.read, Direction::Read, flags)?;
        }
        if conn.write.active() {
            self.del(&mut conn.write, Direction::Write, flags)?;
        }
        Ok(())
    }

    /// One kernel wait with `timeout` in ms (`None` = wait forever),
    /// then synchronous dispatch of everything that fired.
    fn process(&self, timeout: Option<u64>) -> Result<ProcessStats>;

    /// Tear down kernel resources. Construction is the `init` half.
    fn done(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opflags() {
        let f = OpFlags::CLOSE_EVENT | OpFlags::LEVEL;
        assert!(f.contains(OpFlags::CLOSE_EVENT));
        assert!(f.contains(OpFlags::LEVEL));
        assert!(!f.contains(OpFlags::CLEAR));
        assert!(!OpFlags::empty().contains(OpFlags::CLOSE_EVENT));
    }
}
