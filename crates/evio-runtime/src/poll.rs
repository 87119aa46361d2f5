//! Level-triggered poll(2) driver.
//!
//! Capability word: `LEVEL | ONESHOT`. The portable fallback: readiness
//! is re-reported every cycle, so the readiness helpers unregister a
//! descriptor while its consumer is draining.
//!
//! Slot bookkeeping: `ev.index` is the position of the descriptor's
//! `pollfd` ([`INVALID_INDEX`] when absent); both directions of a
//! [`Conn`] share one slot. `del` swap-removes the slot and patches the
//! displaced connection's indices.

use std::cell::RefCell;

use evio_core::driver::{Direction, Driver, OpFlags, ProcessStats};
use evio_core::error::errno;
use evio_core::event::{Conn, Event, INVALID_INDEX};
use evio_core::log::Log;
use evio_core::{ev_alert, Caps, EvioError, Result};

struct PollState {
    fds: Vec<libc::pollfd>,
    conns: Vec<*mut Conn>,
}

pub struct PollDriver {
    state: RefCell<PollState>,
    log: Log,
}

impl PollDriver {
    pub fn new() -> PollDriver {
        PollDriver {
            state: RefCell::new(PollState {
                fds: Vec::with_capacity(64),
                conns: Vec::with_capacity(64),
            }),
            log: Log::reactor(),
        }
    }

    /// Registered descriptor count.
    pub fn nfds(&self) -> usize {
        self.state.borrow().fds.len()
    }
}

impl Default for PollDriver {
    fn default() -> Self {
        PollDriver::new()
    }
}

fn dir_mask(dir: Direction) -> libc::c_short {
    match dir {
        Direction::Read => libc::POLLIN,
        Direction::Write => libc::POLLOUT,
    }
}

impl Driver for PollDriver {
    fn caps(&self) -> Caps {
        Caps::LEVEL | Caps::ONESHOT
    }

    fn add(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()> {
        let conn = ev.data as *mut Conn;
        // Safety: registered events carry their Conn in `data`, and the
        // Conn stays put while either event is active (Driver contract).
        let (fd, pair_index) = unsafe {
            let pair = match dir {
                Direction::Read => &(*conn).write,
                Direction::Write => &(*conn).read,
            };
            let idx = if pair.active() { Some(pair.index) } else { None };
            ((*conn).fd, idx)
        };

        let mut st = self.state.borrow_mut();
        match pair_index {
            Some(i) if i != INVALID_INDEX => {
                st.fds[i as usize].events |= dir_mask(dir);
                ev.index = i;
            }
            _ => {
                st.fds.push(libc::pollfd {
                    fd,
                    events: dir_mask(dir),
                    revents: 0,
                });
                st.conns.push(conn);
                ev.index = (st.fds.len() - 1) as u32;
            }
        }

        ev.set_active(true);
        ev.set_oneshot(flags.contains(OpFlags::ONESHOT));
        Ok(())
    }

    fn del(&self, ev: &mut Event, dir: Direction, _flags: OpFlags) -> Result<()> {
        ev.set_active(false);

        if ev.index == INVALID_INDEX {
            ev_alert!(self.log, "poll: event is already deleted");
            return Ok(());
        }

        let conn = ev.data as *mut Conn;
        // Safety: as in `add`.
        let pair_active = unsafe {
            match dir {
                Direction::Read => (*conn).write.active(),
                Direction::Write => (*conn).read.active(),
            }
        };

        let i = ev.index as usize;
        let mut st = self.state.borrow_mut();

        if pair_active {
            st.fds[i].events &= !dir_mask(dir);
        } else {
            let last = st.fds.len() - 1;
            st.fds.swap_remove(i);
            st.conns.swap_remove(i);
            if i != last {
                // Safety: queued conns are alive while registered.
                unsafe {
                    let moved = st.conns[i];
                    if (*moved).read.index == last as u32 {
                        (*moved).read.index = i as u32;
                    }
                    if (*moved).write.index == last as u32 {
                        (*moved).write.index = i as u32;
                    }
                }
            }
        }

        ev.index = INVALID_INDEX;
        Ok(())
    }

    fn process(&self, timeout: Option<u64>) -> Result<ProcessStats> {
        let timeout_ms: libc::c_int = match timeout {
            Some(ms) => ms.min(i32::MAX as u64) as libc::c_int,
            None => -1,
        };

        let mut stats = ProcessStats::default();

        let fired: Vec<(*mut Conn, libc::c_short)> = {
            let mut st = self.state.borrow_mut();
            let nfds = st.fds.len();
            let n = unsafe { libc::poll(st.fds.as_mut_ptr(), nfds as libc::nfds_t, timeout_ms) };

            if n == -1 {
                if errno() == libc::EINTR {
                    return Ok(stats);
                }
                return Err(EvioError::DriverFailed("poll", errno()));
            }

            let mut fired = Vec::with_capacity(n as usize);
            for i in 0..nfds {
                let revents = st.fds[i].revents;
                if revents != 0 {
                    st.fds[i].revents = 0;
                    fired.push((st.conns[i], revents));
                }
            }
            fired
        };

        stats.events = fired.len();

        for (conn, mut revents) in fired {
            // Safety: the owner keeps a registered Conn alive until
            // after the process cycle that observes its close.
            unsafe {
                if (*conn).fd == -1 {
                    stats.stale += 1;
                    continue;
                }

                if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    // Let at least one handler observe the error on its
                    // next I/O attempt.
                    revents |= libc::POLLIN | libc::POLLOUT;
                }

                if revents & libc::POLLIN != 0 && (*conn).read.active() {
                    let rev = &mut (*conn).read;
                    if rev.oneshot() {
                        // The filter consumes itself at fire time.
                        self.del(rev, Direction::Read, OpFlags::empty())?;
                    }
                    rev.set_ready(true);
                    stats.dispatched += 1;
                    (rev.handler)(rev);
                }

                if revents & libc::POLLOUT != 0 && (*conn).write.active() {
                    let wev = &mut (*conn).write;
                    if wev.oneshot() {
                        self.del(wev, Direction::Write, OpFlags::empty())?;
                    }
                    wev.set_ready(true);
                    stats.dispatched += 1;
                    (wev.handler)(wev);
                }
            }
        }

        Ok(stats)
    }

    fn done(&self) -> Result<()> {
        Ok(())
    }
}
