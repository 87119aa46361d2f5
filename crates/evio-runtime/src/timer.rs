//! The reactor's timer set.
//!
//! An ordered set keyed by `(deadline_ms, sequence)` with real removal,
//! so `timer_set` on an event always equals membership here. Insert,
//! remove and min are O(log n); the sequence breaks ties between
//! events sharing a deadline.
//!
//! The set stores raw event pointers: an event must not move between
//! `insert` and `remove`/expiration. Single-threaded, reactor-owned.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use evio_core::event::Event;

pub struct TimerSet {
    tree: BTreeMap<(u64, u64), NonNull<Event>>,
    seq: u64,
}

impl TimerSet {
    pub fn new() -> TimerSet {
        TimerSet {
            tree: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Arm `ev` for `deadline` (absolute ms). Re-arming an armed event
    /// moves it.
    pub fn insert(&mut self, ev: &mut Event, deadline: u64) {
        if ev.timer_set() {
            self.tree.remove(&(ev.timer_key, ev.timer_seq));
        }
        self.seq += 1;
        ev.timer_key = deadline;
        ev.timer_seq = self.seq;
        ev.set_timer_set(true);
        self.tree.insert((deadline, self.seq), NonNull::from(ev));
    }

    pub fn remove(&mut self, ev: &mut Event) {
        if !ev.timer_set() {
            return;
        }
        self.tree.remove(&(ev.timer_key, ev.timer_seq));
        ev.set_timer_set(false);
    }

    /// Earliest armed deadline in absolute ms.
    pub fn first_deadline(&self) -> Option<u64> {
        self.tree.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Detach and return one event whose deadline has passed. The
    /// caller clears `timer_set` and fires the handler; taking one at
    /// a time lets handlers re-enter the set.
    pub fn take_expired(&mut self, now: u64) -> Option<NonNull<Event>> {
        let (&key, _) = self.tree.iter().next()?;
        if key.0 > now {
            return None;
        }
        self.tree.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        TimerSet::new()
    }
}
