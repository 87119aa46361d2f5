//! The per-direction event record.
//!
//! An [`Event`] represents one direction (read or write) on one
//! descriptor, or one asynchronous operation. Its owner (a [`Conn`] or
//! an offload task) embeds it; the reactor and its driver hold raw
//! pointers to it while it is registered, so a registered event must
//! not be moved. The ~20 single-bit state flags are packed into one
//! `u32` word; no bit needs atomic access because every bit has a
//! single-thread-at-a-time owner (the reactor, or whoever currently
//! holds the event).

use crate::log::Log;

/// Driver-private slot sentinel: the event is not held in any slot.
pub const INVALID_INDEX: u32 = 0xd0d0_d0d0;

/// Invoked when the event fires. Always runs on the reactor thread.
pub type EventHandler = fn(&mut Event);

/// Handler that does nothing. Placeholder until the owner binds one.
pub fn noop_handler(_ev: &mut Event) {}

/// One-word flag vector. Kept adjacent and single-word-sized so the
/// hot state shares a cache line with the rest of the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const ONESHOT: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const USE_INSTANCE: u32 = 1 << 2;
    pub const INSTANCE: u32 = 1 << 3;
    pub const ACTIVE: u32 = 1 << 4;
    pub const DISABLED: u32 = 1 << 5;
    pub const POSTED: u32 = 1 << 6;
    pub const READY: u32 = 1 << 7;
    pub const COMPLETE: u32 = 1 << 8;
    pub const EOF: u32 = 1 << 9;
    pub const ERROR: u32 = 1 << 10;
    pub const TIMEDOUT: u32 = 1 << 11;
    pub const TIMER_SET: u32 = 1 << 12;
    pub const DELAYED: u32 = 1 << 13;
    pub const READ_DISCARDED: u32 = 1 << 14;
    pub const UNEXPECTED_EOF: u32 = 1 << 15;
    pub const ACCEPT: u32 = 1 << 16;
    pub const DEFERRED_ACCEPT: u32 = 1 << 17;
    pub const OVERFLOW: u32 = 1 << 18;
    /// Hangup reported by the driver before the consumer read to EOF.
    pub const PENDING_EOF: u32 = 1 << 19;

    #[inline]
    pub fn get(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    #[inline]
    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// State record for one I/O direction or one async completion.
///
/// # Invariants
///
/// 1. `active` is set iff the driver holds a registration for this
///    event. Only driver `add`/`del` (and the completion drain, which
///    takes over a task's event) transition it.
/// 2. `ready` means at least one byte of I/O is known possible without
///    blocking; consumers clear it when they observe `EAGAIN`.
/// 3. On drivers with instance support, a fired event is stale when the
///    instance bit recovered from the registration does not match the
///    stored `instance`; stale events are never dispatched.
/// 4. A `oneshot` registration consumes itself at fire time: the driver
///    clears `active` before invoking the handler.
/// 5. `timer_set` iff the event is in the reactor's timer set.
/// 6. `posted` iff the event is in the posted queue.
pub struct Event {
    /// Opaque back-reference to the owner. For driver-registered events
    /// this is the owning [`Conn`]; for task completion events it is
    /// the task context.
    pub data: usize,

    /// Fired-event callback, run on the reactor thread.
    pub handler: EventHandler,

    /// Driver-private slot, [`INVALID_INDEX`] when not held in one.
    pub index: u32,

    /// Posted-queue link. Owned by whichever queue currently holds the
    /// event; null otherwise.
    pub next: *mut Event,

    /// Diagnostic context.
    pub log: Log,

    flags: EventFlags,

    /// Bytes readable / writable buffer space on drivers that report a
    /// count; 0/1 elsewhere. Negative means "unknown, drain greedily".
    pub available: i32,

    /// Deferred errno reported together with `pending_eof`.
    pub pending_errno: i32,

    /// Absolute deadline in ms while `timer_set`.
    pub timer_key: u64,
    /// Insertion sequence breaking deadline ties in the timer set.
    pub timer_seq: u64,
}

macro_rules! flag_accessors {
    ($($get:ident / $set:ident => $bit:ident),+ $(,)?) => {
        $(
            #[inline]
            pub fn $get(&self) -> bool {
                self.flags.get(EventFlags::$bit)
            }

            #[inline]
            pub fn $set(&mut self, on: bool) {
                self.flags.set(EventFlags::$bit, on);
            }
        )+
    };
}

impl Event {
    pub fn new(handler: EventHandler) -> Self {
        Event {
            data: 0,
            handler,
            index: INVALID_INDEX,
            next: std::ptr::null_mut(),
            log: Log::reactor(),
            flags: EventFlags::default(),
            available: 0,
            pending_errno: 0,
            timer_key: 0,
            timer_seq: 0,
        }
    }

    /// Reset for reuse: all flags cleared, a new handler bound, and the
    /// `instance` generation bit flipped so notifications queued for
    /// the previous registration are recognized as stale. The `write`
    /// direction marker survives because it describes what this event
    /// *is*, not what state it is in.
    pub fn reset(&mut self, handler: EventHandler) {
        let instance = self.instance();
        let write = self.write();
        self.flags = EventFlags::default();
        self.set_instance(!instance);
        self.set_write(write);
        self.handler = handler;
        self.index = INVALID_INDEX;
        self.next = std::ptr::null_mut();
        self.available = 0;
        self.pending_errno = 0;
        self.timer_key = 0;
        self.timer_seq = 0;
    }

    flag_accessors! {
        oneshot / set_oneshot => ONESHOT,
        write / set_write => WRITE,
        use_instance / set_use_instance => USE_INSTANCE,
        instance / set_instance => INSTANCE,
        active / set_active => ACTIVE,
        disabled / set_disabled => DISABLED,
        posted / set_posted => POSTED,
        ready / set_ready => READY,
        complete / set_complete => COMPLETE,
        eof / set_eof => EOF,
        error / set_error => ERROR,
        timedout / set_timedout => TIMEDOUT,
        timer_set / set_timer_set => TIMER_SET,
        delayed / set_delayed => DELAYED,
        read_discarded / set_read_discarded => READ_DISCARDED,
        unexpected_eof / set_unexpected_eof => UNEXPECTED_EOF,
        accept / set_accept => ACCEPT,
        deferred_accept / set_deferred_accept => DEFERRED_ACCEPT,
        overflow / set_overflow => OVERFLOW,
        pending_eof / set_pending_eof => PENDING_EOF,
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("available", &self.available)
            .finish()
    }
}

/// A descriptor with its pair of direction events.
///
/// Drivers operate on events whose `data` points back at the owning
/// `Conn`: that is how a notification for one direction finds its
/// sibling, and how a registration for a second direction turns into a
/// modification of the first. A `Conn` must not be moved while either
/// of its events is active.
pub struct Conn {
    /// Descriptor, -1 once closed. A stale notification for a closed
    /// descriptor is dropped by the driver.
    pub fd: std::os::unix::io::RawFd,
    pub read: Event,
    pub write: Event,
    /// Owner context (connection object, pool, ...).
    pub data: usize,
}

impl Conn {
    pub fn new(fd: std::os::unix::io::RawFd) -> Box<Conn> {
        let mut conn = Box::new(Conn {
            fd,
            read: Event::new(noop_handler),
            write: Event::new(noop_handler),
            data: 0,
        });
        conn.write.set_write(true);
        let back = &*conn as *const Conn as usize;
        conn.read.data = back;
        conn.write.data = back;
        conn
    }

    /// Mark closed. Registrations die with the descriptor; anything the
    /// kernel already queued is dropped by the fd check at dispatch.
    pub fn close(&mut self) {
        self.fd = -1;
        self.read.set_active(false);
        self.write.set_active(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_handler(ev: &mut Event) {
        ev.available += 1;
    }

    #[test]
    fn test_flag_word() {
        let mut f = EventFlags::default();
        assert!(!f.get(EventFlags::READY));
        f.set(EventFlags::READY, true);
        f.set(EventFlags::ACTIVE, true);
        assert!(f.get(EventFlags::READY));
        assert!(f.get(EventFlags::ACTIVE));
        f.set(EventFlags::READY, false);
        assert!(!f.get(EventFlags::READY));
        assert!(f.get(EventFlags::ACTIVE));
    }

    #[test]
    fn test_new_event_is_idle() {
        let ev = Event::new(count_handler);
        assert!(!ev.active());
        assert!(!ev.ready());
        assert!(!ev.timer_set());
        assert_eq!(ev.index, INVALID_INDEX);
    }

    #[test]
    fn test_reset_flips_instance_and_keeps_direction() {
        let mut ev = Event::new(count_handler);
        ev.set_write(true);
        ev.set_ready(true);
        ev.set_active(true);
        assert!(!ev.instance());

        ev.reset(count_handler);
        assert!(ev.instance());
        assert!(ev.write());
        assert!(!ev.ready());
        assert!(!ev.active());

        ev.reset(count_handler);
        assert!(!ev.instance());
    }

    #[test]
    fn test_conn_back_references() {
        let conn = Conn::new(7);
        let back = &*conn as *const Conn as usize;
        assert_eq!(conn.read.data, back);
        assert_eq!(conn.write.data, back);
        assert!(conn.write.write());
        assert!(!conn.read.write());
    }

    #[test]
    fn test_conn_close_deactivates() {
        let mut conn = Conn::new(3);
        conn.read.set_active(true);
        conn.close();
        assert_eq!(conn.fd, -1);
        assert!(!conn.read.active());
    }
}
