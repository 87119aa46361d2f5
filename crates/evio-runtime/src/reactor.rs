//! The per-worker reactor.
//!
//! A `Reactor` bundles the readiness driver with the timer set and the
//! posted-event queue. It is strictly single-threaded: every event
//! handler, every readiness helper, every timer expiration and every
//! completion handler runs on the thread that owns it. Other threads
//! reach it only through a notify channel.
//!
//! There is no process-global driver: the reactor is passed explicitly,
//! or fetched through the thread-local handle installed at worker init
//! (one reactor per thread).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use evio_core::driver::{Driver, ProcessStats};
use evio_core::event::Event;
use evio_core::log::Log;
use evio_core::{Caps, Result};

use crate::posted::PostedQueue;
use crate::timer::TimerSet;

thread_local! {
    static CURRENT: RefCell<Option<Rc<Reactor>>> = const { RefCell::new(None) };
}

pub struct Reactor {
    driver: Box<dyn Driver>,
    caps: Caps,
    timers: RefCell<TimerSet>,
    posted: RefCell<PostedQueue>,
    epoch: Instant,
    log: Log,
}

impl Reactor {
    pub fn new(driver: Box<dyn Driver>) -> Rc<Reactor> {
        let caps = driver.caps();
        Rc::new(Reactor {
            driver,
            caps,
            timers: RefCell::new(TimerSet::new()),
            posted: RefCell::new(PostedQueue::new()),
            epoch: Instant::now(),
            log: Log::reactor(),
        })
    }

    /// Install this reactor as the thread's handle. One per thread.
    pub fn install(self: &Rc<Self>) {
        CURRENT.with(|c| *c.borrow_mut() = Some(Rc::clone(self)));
    }

    pub fn uninstall() {
        CURRENT.with(|c| *c.borrow_mut() = None);
    }

    /// The handle installed on the calling thread, if any.
    pub fn current() -> Option<Rc<Reactor>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    #[inline]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    #[inline]
    pub fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    #[inline]
    pub fn log(&self) -> Log {
        self.log
    }

    /// Monotonic milliseconds since the reactor was created.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // ── Timers ──
    //
    // The event must stay put while `timer_set`; the set holds a raw
    // pointer to it until `del_timer` or expiration.

    pub fn add_timer(&self, ev: &mut Event, timeout_ms: u64) {
        let deadline = self.now_ms() + timeout_ms;
        self.timers.borrow_mut().insert(ev, deadline);
    }

    pub fn del_timer(&self, ev: &mut Event) {
        self.timers.borrow_mut().remove(ev);
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    // ── Posted events ──
    //
    // Deferred invocation on this thread: the handler runs from
    // `run_once` after the process cycle instead of inline. The event
    // must stay put while `posted`.

    pub fn post_event(&self, ev: &mut Event) {
        self.posted.borrow_mut().post(ev);
    }

    pub fn delete_posted(&self, ev: &mut Event) {
        self.posted.borrow_mut().delete(ev);
    }

    // ── The cycle ──

    /// One reactor iteration: kernel wait bounded by the nearest timer,
    /// handler dispatch, timer expiration, posted-queue drain.
    ///
    /// `idle_timeout` bounds the wait when no timer is armed; `None`
    /// means wait forever.
    pub fn run_once(&self, idle_timeout: Option<u64>) -> Result<ProcessStats> {
        let timeout = match self.timers.borrow().first_deadline() {
            Some(deadline) => Some(deadline.saturating_sub(self.now_ms())),
            None => idle_timeout,
        };

        let stats = self.driver.process(timeout)?;

        self.expire_timers();
        self.process_posted();

        Ok(stats)
    }

    fn expire_timers(&self) {
        let now = self.now_ms();
        loop {
            // One entry per iteration: the handler may re-borrow the
            // set to arm or cancel timers.
            let ptr = match self.timers.borrow_mut().take_expired(now) {
                Some(ptr) => ptr,
                None => return,
            };
            // Safety: the owner keeps the event alive while timer_set;
            // take_expired just cleared membership.
            let ev = unsafe { &mut *ptr.as_ptr() };
            ev.set_timer_set(false);
            ev.set_timedout(true);
            (ev.handler)(ev);
        }
    }

    fn process_posted(&self) {
        loop {
            let ptr = match self.posted.borrow_mut().take_first() {
                Some(ptr) => ptr,
                None => return,
            };
            // Safety: the owner keeps the event alive while posted.
            let ev = unsafe { &mut *ptr };
            ev.set_posted(false);
            ev.next = std::ptr::null_mut();
            (ev.handler)(ev);
        }
    }
}
