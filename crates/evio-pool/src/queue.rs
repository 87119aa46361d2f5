//! Intrusive lock-free task queues.
//!
//! A two-pointer linked queue: `first` is the head, `last_p` points at
//! the tail link cell — the head cell itself while the queue is empty,
//! or the tail task's `next` field otherwise. Appending CASes `last_p`
//! from the old tail link to `&new.next`, then publishes `new` with a
//! release store through the old link; consumers load with acquire.
//!
//! Two access patterns share the structure:
//!
//! - **intake**: enqueued from the single reactor thread, dequeued by
//!   many workers ([`enqueue`], [`dequeue_spin`]). The enqueue's
//!   rebuild branch ("either this is the first task or the last one
//!   has just been dequeued") writes `first`/`last_p` with plain
//!   release stores, which is only sound with one submitting thread.
//! - **completion**: enqueued by many workers, drained by the single
//!   reactor ([`enqueue_multi`], [`dequeue_single`]).
//!
//! All functions here are `unsafe`: the caller passes raw ownership of
//! heap tasks through the queue and must uphold the pattern above.
//!
//! [`enqueue`]: TaskQueue::enqueue
//! [`dequeue_spin`]: TaskQueue::dequeue_spin
//! [`enqueue_multi`]: TaskQueue::enqueue_multi
//! [`dequeue_single`]: TaskQueue::dequeue_single

use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, Ordering};

use crate::task::Task;

pub struct TaskQueue {
    first: AtomicPtr<Task>,
    last_p: AtomicPtr<AtomicPtr<Task>>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            first: AtomicPtr::new(ptr::null_mut()),
            last_p: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn head_cell(&self) -> *mut AtomicPtr<Task> {
        &self.first as *const AtomicPtr<Task> as *mut AtomicPtr<Task>
    }

    /// Point `last_p` at the head cell. Must run once the queue has
    /// reached its final address (it is self-referential), before any
    /// enqueue.
    pub fn attach(&self) {
        self.first.store(ptr::null_mut(), Ordering::Relaxed);
        self.last_p.store(self.head_cell(), Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.first.load(Ordering::Acquire).is_null()
    }

    /// Append from the single submitting thread.
    ///
    /// # Safety
    ///
    /// `task` must be a valid, exclusively-owned pointer; ownership
    /// transfers to the queue. Only one thread may call this per queue.
    pub unsafe fn enqueue(&self, task: *mut Task) {
        (*task).next.store(ptr::null_mut(), Ordering::Relaxed);

        let next_cell = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;
        let lp = self.last_p.load(Ordering::Acquire);

        if lp == self.head_cell()
            || self
                .last_p
                .compare_exchange(lp, next_cell, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            // Either this is the first task or the last one has just
            // been dequeued by a worker: rebuild the queue around it.
            self.first.store(task, Ordering::Release);
            self.last_p.store(next_cell, Ordering::Release);
        } else {
            // Publish through the old tail link.
            (*lp).store(task, Ordering::Release);
        }
    }

    /// Append from any thread (completion side).
    ///
    /// # Safety
    ///
    /// As [`enqueue`](Self::enqueue), minus the single-thread
    /// restriction. The caller must have issued a full fence after
    /// clearing `task.next` if the task was previously linked.
    pub unsafe fn enqueue_multi(&self, task: *mut Task) {
        let next_cell = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;

        let mut lp = self.last_p.load(Ordering::Acquire);
        loop {
            match self
                .last_p
                .compare_exchange_weak(lp, next_cell, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(cur) => lp = cur,
            }
        }

        // `lp` is the head cell when the queue was empty, otherwise the
        // previous tail's next field; either way this publishes.
        (*lp).store(task, Ordering::Release);
    }

    /// Dequeue for workers: competes with other dequeuers, spins
    /// through the transient states an in-flight append can leave.
    ///
    /// Loops until a task is available — callers gate on the pool
    /// semaphore, which guarantees one is (or is about to be).
    ///
    /// # Safety
    ///
    /// Queue must be attached and used in the intake pattern. The
    /// returned pointer is exclusively owned by the caller.
    pub unsafe fn dequeue_spin(&self) -> *mut Task {
        'again: loop {
            let mut task;
            loop {
                task = self.first.load(Ordering::Acquire);
                if task.is_null() {
                    // Submitter is between its tail CAS and the
                    // publication store.
                    std::thread::yield_now();
                    continue 'again;
                }
                let next = (*task).next.load(Ordering::Acquire);
                if self
                    .first
                    .compare_exchange(task, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }

            if self.first.load(Ordering::Acquire).is_null() {
                // We took the last task: retire the tail link, with
                // special care to avoid racing a concurrent append.
                let next_cell = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;

                if self.last_p.load(Ordering::Acquire) != next_cell
                    || self
                        .last_p
                        .compare_exchange(
                            next_cell,
                            self.head_cell(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                {
                    // An appender claimed our next field as the tail
                    // link.
                    let next = (*task).next.load(Ordering::Acquire);
                    if next.is_null() {
                        // ...but has not published yet: put the task
                        // back and retry from the top.
                        self.first.store(task, Ordering::Release);
                        std::thread::yield_now();
                        continue 'again;
                    }
                    self.first.store(next, Ordering::Release);
                }
            }

            return task;
        }
    }

    /// Dequeue for the single consumer (the reactor drain). Returns
    /// null when the queue is empty *or* when an append is
    /// mid-publication — the pending notify will resume the drain.
    ///
    /// # Safety
    ///
    /// Queue must be attached and used in the completion pattern; only
    /// one thread may call this per queue.
    pub unsafe fn dequeue_single(&self) -> *mut Task {
        let task = self.first.load(Ordering::Acquire);
        if task.is_null() {
            return ptr::null_mut();
        }

        let next = (*task).next.load(Ordering::Acquire);
        self.first.store(next, Ordering::Release);

        if next.is_null() {
            let next_cell = &(*task).next as *const AtomicPtr<Task> as *mut AtomicPtr<Task>;

            if self.last_p.load(Ordering::Acquire) != next_cell
                || self
                    .last_p
                    .compare_exchange(
                        next_cell,
                        self.head_cell(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
            {
                // An appender is linking behind this task: put it back
                // and let the next wake-up pick both up.
                self.first.store(task, Ordering::Release);
                return ptr::null_mut();
            }
        }

        task
    }

    /// Drop every queued task. Only sound once all other users are
    /// gone (pool teardown).
    pub unsafe fn drain_and_drop(&self) -> usize {
        let mut n = 0;
        let mut cur = self.first.swap(ptr::null_mut(), Ordering::AcqRel);
        self.last_p.store(self.head_cell(), Ordering::Release);
        while !cur.is_null() {
            let next = (*cur).next.load(Ordering::Acquire);
            drop(Box::from_raw(cur));
            n += 1;
            cur = next;
        }
        n
    }
}

/// The handoff fence: orders everything the worker wrote into the task
/// before the completion enqueue that publishes it.
#[inline]
pub fn publication_fence() {
    fence(Ordering::SeqCst);
}
