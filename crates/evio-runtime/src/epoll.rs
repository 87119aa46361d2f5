//! Edge-triggered epoll driver.
//!
//! Capability word: `CLEAR | GREEDY | INSTANCE`. Registrations are
//! always `EPOLLET`; consumers must drain to EAGAIN per notification.
//!
//! Stale-event filtering: the registration's `epoll_data.u64` carries
//! the owning [`Conn`] pointer with the event's `instance` generation
//! bit folded into bit 0 (a `Conn` is always at least 2-aligned). At
//! dispatch the bit is recovered and compared against the event's
//! current `instance`; a mismatch, or a closed descriptor, means the
//! notification belongs to a cancelled registration and is dropped.

use std::cell::RefCell;
use std::os::unix::io::RawFd;

use evio_core::driver::{Direction, Driver, OpFlags, ProcessStats};
use evio_core::error::errno;
use evio_core::event::{Conn, Event};
use evio_core::log::Log;
use evio_core::{ev_debug, Caps, EvioError, Result};

pub struct EpollDriver {
    ep: std::cell::Cell<RawFd>,
    events: RefCell<Vec<libc::epoll_event>>,
    log: Log,
}

impl EpollDriver {
    /// Create the epoll instance with room for `capacity` notifications
    /// per process cycle.
    pub fn new(capacity: usize) -> Result<EpollDriver> {
        let ep = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if ep < 0 {
            return Err(EvioError::DriverFailed("epoll_create1", errno()));
        }

        Ok(EpollDriver {
            ep: std::cell::Cell::new(ep),
            events: RefCell::new(vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)]),
            log: Log::reactor(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, ee: *mut libc::epoll_event) -> Result<()> {
        if unsafe { libc::epoll_ctl(self.ep.get(), op, fd, ee) } == -1 {
            return Err(EvioError::DriverFailed("epoll_ctl", errno()));
        }
        Ok(())
    }
}

const READ_MASK: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
const WRITE_MASK: u32 = libc::EPOLLOUT as u32;
const ET: u32 = libc::EPOLLET as u32;
const ERR_MASK: u32 = (libc::EPOLLERR | libc::EPOLLHUP) as u32;

impl Driver for EpollDriver {
    fn caps(&self) -> Caps {
        Caps::CLEAR | Caps::GREEDY | Caps::INSTANCE
    }

    fn add(&self, ev: &mut Event, dir: Direction, _flags: OpFlags) -> Result<()> {
        let conn = ev.data as *mut Conn;
        // Safety: registered events carry their Conn in `data`, and the
        // Conn stays put while either event is active (Driver contract).
        let (fd, pair_active, this_mask, pair_mask) = unsafe {
            match dir {
                Direction::Read => ((*conn).fd, (*conn).write.active(), READ_MASK, WRITE_MASK),
                Direction::Write => ((*conn).fd, (*conn).read.active(), WRITE_MASK, READ_MASK),
            }
        };

        let mut mask = this_mask | ET;
        let op = if pair_active {
            mask |= pair_mask | ET;
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };

        let mut ee = libc::epoll_event {
            events: mask,
            u64: conn as u64 | ev.instance() as u64,
        };
        self.ctl(op, fd, &mut ee)?;

        ev.set_active(true);
        ev.set_use_instance(true);
        Ok(())
    }

    fn del(&self, ev: &mut Event, dir: Direction, flags: OpFlags) -> Result<()> {
        // The descriptor is going away: the kernel drops the
        // registration with it, no syscall needed.
        if flags.contains(OpFlags::CLOSE_EVENT) {
            ev.set_active(false);
            return Ok(());
        }

        let conn = ev.data as *mut Conn;
        // Safety: as in `add`.
        let (fd, pair_active, pair_mask) = unsafe {
            match dir {
                Direction::Read => ((*conn).fd, (*conn).write.active(), WRITE_MASK),
                Direction::Write => ((*conn).fd, (*conn).read.active(), READ_MASK),
            }
        };

        if pair_active {
            let mut ee = libc::epoll_event {
                events: pair_mask | ET,
                u64: conn as u64 | ev.instance() as u64,
            };
            self.ctl(libc::EPOLL_CTL_MOD, fd, &mut ee)?;
        } else {
            self.ctl(libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())?;
        }

        ev.set_active(false);
        Ok(())
    }

    fn add_conn(&self, conn: &mut Conn) -> Result<()> {
        let mut ee = libc::epoll_event {
            events: READ_MASK | WRITE_MASK | ET,
            u64: conn as *mut Conn as u64 | conn.read.instance() as u64,
        };
        self.ctl(libc::EPOLL_CTL_ADD, conn.fd, &mut ee)?;

        conn.read.set_active(true);
        conn.read.set_use_instance(true);
        conn.write.set_active(true);
        conn.write.set_use_instance(true);
        Ok(())
    }

    fn del_conn(&self, conn: &mut Conn, flags: OpFlags) -> Result<()> {
        if !flags.contains(OpFlags::CLOSE_EVENT) {
            self.ctl(libc::EPOLL_CTL_DEL, conn.fd, std::ptr::null_mut())?;
        }
        conn.read.set_active(false);
        conn.write.set_active(false);
        Ok(())
    }

    fn process(&self, timeout: Option<u64>) -> Result<ProcessStats> {
        let timeout_ms: libc::c_int = match timeout {
            Some(ms) => ms.min(i32::MAX as u64) as libc::c_int,
            None => -1,
        };

        let mut stats = ProcessStats::default();

        let fired: Vec<(u64, u32)> = {
            let mut buf = self.events.borrow_mut();
            let n = unsafe {
                libc::epoll_wait(
                    self.ep.get(),
                    buf.as_mut_ptr(),
                    buf.len() as libc::c_int,
                    timeout_ms,
                )
            };

            if n == -1 {
                if errno() == libc::EINTR {
                    return Ok(stats);
                }
                return Err(EvioError::DriverFailed("epoll_wait", errno()));
            }

            buf[..n as usize].iter().map(|e| (e.u64, e.events)).collect()
        };

        stats.events = fired.len();

        for (tagged, mut revents) in fired {
            let instance = tagged & 1 != 0;
            let conn = (tagged & !1) as *mut Conn;

            // Safety: the registration stored a valid Conn pointer and
            // the owner keeps the Conn alive until after the process
            // cycle that observes its close.
            unsafe {
                if (*conn).fd == -1 || (*conn).read.instance() != instance {
                    // The registration this notification belongs to was
                    // cancelled; the slot may already be reused.
                    stats.stale += 1;
                    ev_debug!(self.log, "epoll: stale event {:#x}", tagged);
                    continue;
                }

                if revents & ERR_MASK != 0 {
                    // Let at least one handler observe the error on its
                    // next I/O attempt.
                    revents |= READ_MASK | WRITE_MASK;
                }

                if revents & libc::EPOLLRDHUP as u32 != 0 {
                    (*conn).read.set_pending_eof(true);
                }

                if revents & libc::EPOLLIN as u32 != 0 && (*conn).read.active() {
                    let rev = &mut (*conn).read;
                    rev.set_ready(true);
                    stats.dispatched += 1;
                    (rev.handler)(rev);
                }

                if revents & libc::EPOLLOUT as u32 != 0 && (*conn).write.active() {
                    let wev = &mut (*conn).write;
                    wev.set_ready(true);
                    stats.dispatched += 1;
                    (wev.handler)(wev);
                }
            }
        }

        Ok(stats)
    }

    fn done(&self) -> Result<()> {
        let ep = self.ep.replace(-1);
        if ep >= 0 {
            unsafe { libc::close(ep) };
        }
        Ok(())
    }
}

impl Drop for EpollDriver {
    fn drop(&mut self) {
        let _ = self.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn counting_handler(ev: &mut Event) {
        FIRED.fetch_add(1, Ordering::SeqCst);
        ev.set_ready(false);
    }

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0, fds.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    fn close_pair(a: RawFd, b: RawFd) {
        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    fn write_byte(fd: RawFd) {
        let b = [1u8];
        let n = unsafe { libc::write(fd, b.as_ptr() as *const _, 1) };
        assert_eq!(n, 1);
    }

    #[test]
    fn test_readable_dispatch() {
        let (a, b) = socketpair();
        let driver = EpollDriver::new(16).unwrap();
        let mut conn = Conn::new(a);
        conn.read.handler = counting_handler;

        driver.add(&mut conn.read, Direction::Read, OpFlags::CLEAR).unwrap();
        assert!(conn.read.active());

        let before = FIRED.load(Ordering::SeqCst);
        write_byte(b);
        let stats = driver.process(Some(1000)).unwrap();

        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.stale, 0);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);

        close_pair(a, b);
    }

    #[test]
    fn test_stale_instance_not_dispatched() {
        let (a, b) = socketpair();
        let driver = EpollDriver::new(16).unwrap();
        let mut conn = Conn::new(a);
        conn.read.handler = counting_handler;

        driver.add(&mut conn.read, Direction::Read, OpFlags::CLEAR).unwrap();
        write_byte(b);

        // Reuse flips the generation bit; the queued notification now
        // carries the old one.
        conn.read.reset(counting_handler);

        let before = FIRED.load(Ordering::SeqCst);
        let stats = driver.process(Some(1000)).unwrap();

        assert_eq!(stats.stale, 1);
        assert_eq!(stats.dispatched, 0);
        assert_eq!(FIRED.load(Ordering::SeqCst), before);

        close_pair(a, b);
    }

    #[test]
    fn test_closed_fd_is_stale() {
        let (a, b) = socketpair();
        let driver = EpollDriver::new(16).unwrap();
        let mut conn = Conn::new(a);
        conn.read.handler = counting_handler;

        driver.add(&mut conn.read, Direction::Read, OpFlags::CLEAR).unwrap();
        write_byte(b);
        conn.close();

        let before = FIRED.load(Ordering::SeqCst);
        let stats = driver.process(Some(1000)).unwrap();

        assert!(stats.stale >= 1);
        assert_eq!(FIRED.load(Ordering::SeqCst), before);

        close_pair(a, b);
    }

    #[test]
    fn test_second_direction_modifies() {
        let (a, b) = socketpair();
        let driver = EpollDriver::new(16).unwrap();
        let mut conn = Conn::new(a);

        driver.add(&mut conn.read, Direction::Read, OpFlags::CLEAR).unwrap();
        // Same fd: this must take the MOD path, not a failing ADD.
        driver.add(&mut conn.write, Direction::Write, OpFlags::CLEAR).unwrap();
        assert!(conn.write.active());

        driver.del(&mut conn.write, Direction::Write, OpFlags::empty()).unwrap();
        assert!(!conn.write.active());
        assert!(conn.read.active());

        close_pair(a, b);
    }

    #[test]
    fn test_idle_process_respects_timeout() {
        let driver = EpollDriver::new(4).unwrap();
        let start = std::time::Instant::now();
        let stats = driver.process(Some(50)).unwrap();
        assert_eq!(stats.events, 0);
        assert!(start.elapsed() >= std::time::Duration::from_millis(45));
    }
}
