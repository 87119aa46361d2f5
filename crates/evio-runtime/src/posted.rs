//! Deferred-invocation queue.
//!
//! Events posted here have their handler run from the reactor cycle
//! instead of inline. Intrusive singly-linked FIFO through
//! `Event::next`; single-threaded, so no atomics. `posted` on an event
//! always equals membership.

use std::ptr;

use evio_core::event::Event;

pub struct PostedQueue {
    first: *mut Event,
    last: *mut Event,
}

impl PostedQueue {
    pub fn new() -> PostedQueue {
        PostedQueue {
            first: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    pub fn post(&mut self, ev: &mut Event) {
        if ev.posted() {
            return;
        }
        ev.next = ptr::null_mut();
        ev.set_posted(true);
        let ptr: *mut Event = ev;
        if self.last.is_null() {
            self.first = ptr;
        } else {
            // Safety: last is a queued event the owner keeps alive.
            unsafe { (*self.last).next = ptr };
        }
        self.last = ptr;
    }

    pub fn delete(&mut self, ev: &mut Event) {
        if !ev.posted() {
            return;
        }
        let target: *mut Event = ev;
        let mut prev: *mut Event = ptr::null_mut();
        let mut cur = self.first;
        while !cur.is_null() {
            if cur == target {
                // Safety: queued events are alive per the post contract.
                unsafe {
                    let next = (*cur).next;
                    if prev.is_null() {
                        self.first = next;
                    } else {
                        (*prev).next = next;
                    }
                    if self.last == cur {
                        self.last = prev;
                    }
                }
                ev.set_posted(false);
                ev.next = ptr::null_mut();
                return;
            }
            prev = cur;
            // Safety: as above.
            cur = unsafe { (*cur).next };
        }
    }

    /// Detach the head. The caller clears `posted` and invokes the
    /// handler; one at a time so handlers may post further events.
    pub fn take_first(&mut self) -> Option<*mut Event> {
        if self.first.is_null() {
            return None;
        }
        let ev = self.first;
        // Safety: queued events are alive per the post contract.
        self.first = unsafe { (*ev).next };
        if self.first.is_null() {
            self.last = ptr::null_mut();
        }
        Some(ev)
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_null()
    }
}

impl Default for PostedQueue {
    fn default() -> Self {
        PostedQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evio_core::event::noop_handler;

    #[test]
    fn test_fifo_order() {
        let mut q = PostedQueue::new();
        let mut a = Event::new(noop_handler);
        let mut b = Event::new(noop_handler);

        q.post(&mut a);
        q.post(&mut b);
        assert!(a.posted());

        assert!(std::ptr::eq(q.take_first().unwrap(), &a));
        assert!(std::ptr::eq(q.take_first().unwrap(), &b));
        assert!(q.take_first().is_none());
    }

    #[test]
    fn test_double_post_is_noop() {
        let mut q = PostedQueue::new();
        let mut a = Event::new(noop_handler);

        q.post(&mut a);
        q.post(&mut a);

        assert!(q.take_first().is_some());
        assert!(q.take_first().is_none());
    }

    #[test]
    fn test_delete_middle() {
        let mut q = PostedQueue::new();
        let mut a = Event::new(noop_handler);
        let mut b = Event::new(noop_handler);
        let mut c = Event::new(noop_handler);

        q.post(&mut a);
        q.post(&mut b);
        q.post(&mut c);

        q.delete(&mut b);
        assert!(!b.posted());

        assert!(std::ptr::eq(q.take_first().unwrap(), &a));
        assert!(std::ptr::eq(q.take_first().unwrap(), &c));
        assert!(q.is_empty());
    }

    #[test]
    fn test_delete_tail_then_post() {
        let mut q = PostedQueue::new();
        let mut a = Event::new(noop_handler);
        let mut b = Event::new(noop_handler);

        q.post(&mut a);
        q.post(&mut b);
        q.delete(&mut b);
        q.post(&mut b);

        assert!(std::ptr::eq(q.take_first().unwrap(), &a));
        assert!(std::ptr::eq(q.take_first().unwrap(), &b));
    }
}
