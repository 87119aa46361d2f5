//! The unit of offload.

use std::any::Any;
use std::ptr;
use std::sync::atomic::AtomicPtr;

use evio_core::event::{Event, EventHandler};
use evio_core::log::Log;

/// Runs on a pool worker; may block. Failure is encoded into the
/// context (conventionally mirrored into the event's `error` bit by
/// the completion handler) — it must not unwind across the pool
/// boundary.
pub type TaskHandler = fn(&mut (dyn Any + Send), &Log);

/// One unit of offloaded work.
///
/// Owned by the caller until posted, by the pool while in flight, and
/// released by the completion drain after the completion handler
/// returns. The embedded `event` fires on the reactor with
/// `complete` set and `active` cleared; its `data` points at the task
/// context so the handler can recover results.
pub struct Task {
    pub(crate) id: u64,
    pub(crate) next: AtomicPtr<Task>,
    pub(crate) handler: TaskHandler,
    pub(crate) ctx: Box<dyn Any + Send>,
    pub event: Event,
    /// Shutdown marker: the dequeuing worker exits instead of running
    /// the handler. Never enters the completion queue.
    pub(crate) poison: bool,
}

impl Task {
    /// Build a task around `ctx`. `completion` runs on the reactor
    /// after `handler` finished on a worker; `event.data` is pointed at
    /// the boxed context.
    pub fn new<T: Any + Send>(ctx: T, handler: TaskHandler, completion: EventHandler) -> Box<Task> {
        let mut ctx = Box::new(ctx);
        let ctx_ptr = &mut *ctx as *mut T as usize;

        let mut task = Box::new(Task {
            id: 0,
            next: AtomicPtr::new(ptr::null_mut()),
            handler,
            ctx,
            event: Event::new(completion),
            poison: false,
        });
        task.event.data = ctx_ptr;
        task
    }

    pub(crate) fn poison_pill() -> Box<Task> {
        let mut task = Task::new((), |_, _| {}, evio_core::event::noop_handler);
        task.poison = true;
        task
    }

    /// Id assigned at post time; 0 before.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ctx_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.ctx.downcast_mut::<T>()
    }
}
