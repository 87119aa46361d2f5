//! Readiness helpers.
//!
//! The (de)registration policy, written once against the capability
//! word so it applies identically to every driver. These four helpers
//! are the most-called code in the system; the rules:
//!
//! - never `add` an active event, never `del` an inactive one;
//! - under LEVEL, a descriptor whose consumer has seen readiness but
//!   not yet drained is unregistered so it cannot storm the loop, and
//!   re-registered once the consumer reports "not ready";
//! - under CLEAR, register once and rely on edge delivery — never
//!   de-register on ready.

use evio_core::driver::{Direction, OpFlags};
use evio_core::event::Event;
use evio_core::{Caps, Result};

use crate::reactor::Reactor;

impl Reactor {
    /// Reconcile a read event's registration with its state.
    ///
    /// `flags` may carry `CLOSE_EVENT` when the descriptor is about to
    /// be closed.
    pub fn handle_read(&self, rev: &mut Event, flags: OpFlags) -> Result<()> {
        if self.caps().contains(Caps::CLEAR) {
            // kqueue, epoll-ET
            if !rev.active() && !rev.ready() {
                self.driver().add(rev, Direction::Read, OpFlags::CLEAR)?;
            }

            return Ok(());
        }

        if self.caps().contains(Caps::LEVEL) {
            // select, poll, /dev/poll
            if !rev.active() && !rev.ready() {
                self.driver().add(rev, Direction::Read, OpFlags::LEVEL)?;

                return Ok(());
            }

            if rev.active() && (rev.ready() || flags.contains(OpFlags::CLOSE_EVENT)) {
                self.driver().del(rev, Direction::Read, flags)?;

                return Ok(());
            }
        }

        // aio, iocp, rtsig: registration is implicit
        Ok(())
    }

    /// LEVEL-only variant for callers toggling a read event in
    /// response to its own readiness.
    pub fn handle_level_read(&self, rev: &mut Event) -> Result<()> {
        if self.caps().contains(Caps::LEVEL) {
            if !rev.active() && !rev.ready() {
                self.driver().add(rev, Direction::Read, OpFlags::LEVEL)?;

                return Ok(());
            }

            if rev.active() && rev.ready() {
                self.driver().del(rev, Direction::Read, OpFlags::empty())?;

                return Ok(());
            }
        }

        Ok(())
    }

    /// Reconcile a write event's registration with its state.
    pub fn handle_write(&self, wev: &mut Event, flags: OpFlags) -> Result<()> {
        if self.caps().contains(Caps::CLEAR) {
            if !wev.active() && !wev.ready() {
                self.driver().add(wev, Direction::Write, OpFlags::CLEAR | flags)?;
            }

            return Ok(());
        }

        if self.caps().contains(Caps::LEVEL) {
            if !wev.active() && !wev.ready() {
                self.driver().add(wev, Direction::Write, OpFlags::LEVEL)?;

                return Ok(());
            }

            if wev.active() && (wev.ready() || flags.contains(OpFlags::CLOSE_EVENT)) {
                self.driver().del(wev, Direction::Write, flags)?;

                return Ok(());
            }
        }

        Ok(())
    }

    /// LEVEL-only variant for callers toggling a write event in
    /// response to its own readiness.
    pub fn handle_level_write(&self, wev: &mut Event) -> Result<()> {
        if self.caps().contains(Caps::LEVEL) {
            if !wev.active() && !wev.ready() {
                self.driver().add(wev, Direction::Write, OpFlags::LEVEL)?;

                return Ok(());
            }

            if wev.active() && wev.ready() {
                self.driver().del(wev, Direction::Write, OpFlags::empty())?;

                return Ok(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evio_core::driver::{Driver, ProcessStats};
    use std::cell::RefCell;

    /// Records every add/del and enforces the active-state contract.
    struct RecordingDriver {
        caps: Caps,
        calls: RefCell<Vec<(&'static str, Direction)>>,
    }

    impl RecordingDriver {
        fn new(caps: Caps) -> Self {
            RecordingDriver {
                caps,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Driver for RecordingDriver {
        fn caps(&self) -> Caps {
            self.caps
        }

        fn add(&self, ev: &mut Event, dir: Direction, _flags: OpFlags) -> Result<()> {
            assert!(!ev.active(), "add on an active event");
            ev.set_active(true);
            self.calls.borrow_mut().push(("add", dir));
            Ok(())
        }

        fn del(&self, ev: &mut Event, dir: Direction, _flags: OpFlags) -> Result<()> {
            assert!(ev.active(), "del on an inactive event");
            ev.set_active(false);
            self.calls.borrow_mut().push(("del", dir));
            Ok(())
        }

        fn process(&self, _timeout: Option<u64>) -> Result<ProcessStats> {
            Ok(ProcessStats::default())
        }

        fn done(&self) -> Result<()> {
            Ok(())
        }
    }

    fn calls_of(r: &Reactor) -> Vec<(&'static str, Direction)> {
        // Safety of the downcast-free peek: tests construct the reactor
        // with a RecordingDriver only.
        let d = r.driver() as *const dyn Driver as *const RecordingDriver;
        unsafe { (*d).calls.borrow().clone() }
    }

    fn noop(_ev: &mut Event) {}

    fn reactor_with(caps: Caps) -> std::rc::Rc<Reactor> {
        Reactor::new(Box::new(RecordingDriver::new(caps)))
    }

    #[test]
    fn test_level_churn() {
        // handle_read on idle -> add; on ready+active -> del; on
        // not-ready again -> add. Exactly two adds, one del.
        let r = reactor_with(Caps::LEVEL);
        let mut ev = Event::new(noop);

        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        assert!(ev.active());

        ev.set_ready(true);
        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        assert!(!ev.active());

        ev.set_ready(false);
        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        assert!(ev.active());

        assert_eq!(
            calls_of(&r),
            vec![
                ("add", Direction::Read),
                ("del", Direction::Read),
                ("add", Direction::Read),
            ]
        );
    }

    #[test]
    fn test_level_close_forces_del() {
        let r = reactor_with(Caps::LEVEL);
        let mut ev = Event::new(noop);

        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        // Not ready, but the file is going away.
        r.handle_read(&mut ev, OpFlags::CLOSE_EVENT).unwrap();

        assert_eq!(
            calls_of(&r),
            vec![("add", Direction::Read), ("del", Direction::Read)]
        );
    }

    #[test]
    fn test_clear_registers_exactly_once() {
        // Ten calls, active going false->true after the first:
        // one add, zero dels.
        let r = reactor_with(Caps::CLEAR);
        let mut ev = Event::new(noop);

        for _ in 0..10 {
            r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        }

        assert_eq!(calls_of(&r), vec![("add", Direction::Read)]);
        assert!(ev.active());
    }

    #[test]
    fn test_clear_never_deregisters_on_ready() {
        let r = reactor_with(Caps::CLEAR);
        let mut ev = Event::new(noop);

        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        ev.set_ready(true);
        r.handle_read(&mut ev, OpFlags::empty()).unwrap();
        r.handle_read(&mut ev, OpFlags::CLOSE_EVENT).unwrap();

        assert_eq!(calls_of(&r), vec![("add", Direction::Read)]);
    }

    #[test]
    fn test_implicit_backends_are_noops() {
        for caps in [Caps::AIO, Caps::IOCP, Caps::RTSIG | Caps::EDGE] {
            let r = reactor_with(caps);
            let mut ev = Event::new(noop);

            r.handle_read(&mut ev, OpFlags::empty()).unwrap();
            r.handle_write(&mut ev, OpFlags::empty()).unwrap();
            r.handle_level_read(&mut ev).unwrap();

            assert!(calls_of(&r).is_empty());
            assert!(!ev.active());
        }
    }

    #[test]
    fn test_write_mirrors_read_under_level() {
        let r = reactor_with(Caps::LEVEL);
        let mut ev = Event::new(noop);
        ev.set_write(true);

        r.handle_write(&mut ev, OpFlags::empty()).unwrap();
        ev.set_ready(true);
        r.handle_write(&mut ev, OpFlags::empty()).unwrap();

        assert_eq!(
            calls_of(&r),
            vec![("add", Direction::Write), ("del", Direction::Write)]
        );
    }

    #[test]
    fn test_level_variant_toggles() {
        let r = reactor_with(Caps::LEVEL);
        let mut ev = Event::new(noop);

        r.handle_level_read(&mut ev).unwrap();
        assert!(ev.active());

        ev.set_ready(true);
        r.handle_level_read(&mut ev).unwrap();
        assert!(!ev.active());

        // active && ready both false after del with ready still set:
        // no registration until the consumer clears ready.
        r.handle_level_read(&mut ev).unwrap();
        assert_eq!(calls_of(&r).len(), 2);
    }
}
