//! POSIX counting semaphore.
//!
//! Gates the worker dequeue and backs the queue-depth check: the
//! value is posted-minus-dequeued, i.e. tasks waiting in the intake
//! queue.

use std::cell::UnsafeCell;

use evio_core::error::errno;
use evio_core::{EvioError, Result};

pub struct Semaphore {
    sem: UnsafeCell<libc::sem_t>,
}

// Safety: sem_t is designed for cross-thread use; every access goes
// through the sem_* calls.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new() -> Result<Semaphore> {
        let sem = UnsafeCell::new(unsafe { std::mem::zeroed() });
        let rc = unsafe { libc::sem_init(sem.get(), 0, 0) };
        if rc == -1 {
            return Err(EvioError::SemFailed(errno()));
        }
        Ok(Semaphore { sem })
    }

    /// Block until the count is positive, then decrement. Retries
    /// through signal interruption.
    pub fn wait(&self) -> Result<()> {
        loop {
            let rc = unsafe { libc::sem_wait(self.sem.get()) };
            if rc == 0 {
                return Ok(());
            }
            let e = errno();
            if e != libc::EINTR {
                return Err(EvioError::SemFailed(e));
            }
        }
    }

    pub fn post(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem.get()) } == -1 {
            return Err(EvioError::SemFailed(errno()));
        }
        Ok(())
    }

    /// Current count.
    pub fn value(&self) -> Result<i64> {
        let mut val: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem.get(), &mut val) } == -1 {
            return Err(EvioError::SemFailed(errno()));
        }
        Ok(val as i64)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_destroy(self.sem.get()) };
    }
}
