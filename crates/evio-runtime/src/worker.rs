//! Worker-process lifecycle.

use std::rc::Rc;

use crate::reactor::Reactor;

/// Which role this process plays. Offload pools are instantiated only
/// in processes that run an event loop of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Master,
    Worker,
    Single,
}

impl ProcessRole {
    /// Whether this role starts thread pools.
    pub fn runs_pools(&self) -> bool {
        matches!(self, ProcessRole::Worker | ProcessRole::Single)
    }
}

/// Bind the reactor to the calling thread for the worker's lifetime.
/// Dropping the guard uninstalls it.
pub struct WorkerGuard {
    _private: (),
}

pub fn init_worker(reactor: &Rc<Reactor>) -> WorkerGuard {
    reactor.install();
    WorkerGuard { _private: () }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        Reactor::uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evio_core::driver::{Direction, Driver, OpFlags, ProcessStats};
    use evio_core::event::Event;
    use evio_core::{Caps, Result};

    struct NullDriver;

    impl Driver for NullDriver {
        fn caps(&self) -> Caps {
            Caps::LEVEL
        }

        fn add(&self, _ev: &mut Event, _dir: Direction, _flags: OpFlags) -> Result<()> {
            Ok(())
        }

        fn del(&self, _ev: &mut Event, _dir: Direction, _flags: OpFlags) -> Result<()> {
            Ok(())
        }

        fn process(&self, _timeout: Option<u64>) -> Result<ProcessStats> {
            Ok(ProcessStats::default())
        }

        fn done(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_role_gating() {
        assert!(!ProcessRole::Master.runs_pools());
        assert!(ProcessRole::Worker.runs_pools());
        assert!(ProcessRole::Single.runs_pools());
    }

    #[test]
    fn test_guard_uninstalls_on_drop() {
        let reactor = Reactor::new(Box::new(NullDriver));
        {
            let _guard = init_worker(&reactor);
            assert!(Reactor::current().is_some());
        }
        assert!(Reactor::current().is_none());
    }
}
