//! Eventfd notify channel.
//!
//! The bridge from worker threads back into the reactor: a
//! [`NotifyChannel`] wraps an eventfd in a pseudo-connection registered
//! with the driver, and hands out [`NotifySignal`]s other threads use
//! to wake the loop. Coalescing comes for free from eventfd counter
//! semantics: any number of signals before the reactor reads collapse
//! into one wake-up.

use std::os::unix::io::RawFd;

use evio_core::driver::{Direction, Driver, OpFlags};
use evio_core::error::errno;
use evio_core::event::{Conn, Event, EventHandler};
use evio_core::{Caps, EvioError, Notifier, Result};

/// The reactor-side half: owns the eventfd and its pseudo-connection.
pub struct NotifyChannel {
    fd: RawFd,
    conn: Box<Conn>,
}

// Safety: the pseudo-connection is only ever touched on the reactor
// thread (by driver dispatch and rearm); every cross-thread use goes
// through the fd, and fd writes/reads are thread-safe.
unsafe impl Send for NotifyChannel {}
unsafe impl Sync for NotifyChannel {}

impl NotifyChannel {
    /// Create the eventfd, bind `handler`/`data` to its read event and
    /// register it with `driver` under the capability-appropriate
    /// filter mode.
    ///
    /// `data` lands in `conn.data`; the event's own `data` keeps
    /// pointing at the pseudo-connection, as the driver requires.
    pub fn create(driver: &dyn Driver, handler: EventHandler, data: usize) -> Result<NotifyChannel> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(EvioError::NotifyUnavailable(errno()));
        }

        let mut conn = Conn::new(fd);
        conn.data = data;
        conn.read.handler = handler;

        let mode = if driver.caps().contains(Caps::CLEAR) {
            OpFlags::CLEAR
        } else {
            OpFlags::LEVEL
        };

        if let Err(e) = driver.add(&mut conn.read, Direction::Read, mode) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        Ok(NotifyChannel { fd, conn })
    }

    /// A sender handle for worker threads. Copyable, fd-only.
    pub fn signaler(&self) -> NotifySignal {
        NotifySignal { fd: self.fd }
    }

    /// Drain the eventfd counter so the next signal produces a fresh
    /// wake-up. Required on level-triggered drivers; harmless
    /// elsewhere.
    pub fn rearm(&self) -> Result<()> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(self.fd, &mut val as *mut u64 as *mut libc::c_void, 8)
        };
        if ret < 0 {
            let e = errno();
            // Nothing pending: already re-armed.
            if e == libc::EAGAIN {
                return Ok(());
            }
            return Err(EvioError::NotifyUnavailable(e));
        }
        Ok(())
    }

    pub fn event(&mut self) -> &mut Event {
        &mut self.conn.read
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for NotifyChannel {
    fn drop(&mut self) {
        if self.fd >= 0 {
            self.conn.close();
            unsafe { libc::close(self.fd) };
            self.fd = -1;
        }
    }
}

/// The sender half. Any thread, any time; never blocks.
#[derive(Debug, Clone, Copy)]
pub struct NotifySignal {
    fd: RawFd,
}

impl NotifySignal {
    /// Wake the reactor. A plain 8-byte write: lock-free and
    /// async-signal-safe.
    pub fn signal(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(self.fd, &val as *const u64 as *const libc::c_void, 8)
        };
        if ret < 0 {
            let e = errno();
            // Counter saturated: a wake-up is already pending.
            if e == libc::EAGAIN {
                return Ok(());
            }
            return Err(EvioError::NotifyUnavailable(e));
        }
        Ok(())
    }
}

impl Notifier for NotifySignal {
    fn notify(&self) -> Result<()> {
        self.signal()
    }
}
