//! The thread pool: post, worker cycle, completion drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use evio_core::driver::Driver;
use evio_core::event::{Conn, Event};
use evio_core::log::Log;
use evio_core::{ev_alert, ev_debug, ev_error, EvioError, Result};
use evio_runtime::notify::{NotifyChannel, NotifySignal};
use evio_runtime::signal;

use crate::queue::{publication_fence, TaskQueue};
use crate::semaphore::Semaphore;
use crate::task::Task;

/// A failed post hands the task back so the caller can degrade
/// gracefully — run the work inline or fail the request. `task` is
/// `None` only when the failure happened after the task was already
/// queued (semaphore breakage: the pool is unusable).
pub struct PostError {
    pub error: EvioError,
    pub task: Option<Box<Task>>,
}

impl std::fmt::Debug for PostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PostError({})", self.error)
    }
}

/// A named set of worker threads with lock-free intake and completion
/// queues and a notify channel into the reactor.
///
/// `post` and `destroy` must be called on the reactor thread (the
/// intake queue has a single submitting thread); everything else is
/// internal.
pub struct ThreadPool {
    name: String,
    threads: usize,
    max_queue: i64,

    sem: Semaphore,
    task_id: AtomicU64,
    in_q: TaskQueue,
    out_q: TaskQueue,

    notify: Mutex<Option<NotifyChannel>>,
    handles: Mutex<Vec<JoinHandle<()>>>,

    log: Log,
}

impl ThreadPool {
    pub fn new(name: &str, threads: usize, max_queue: i64) -> Result<ThreadPool> {
        Ok(ThreadPool {
            name: name.to_owned(),
            threads,
            max_queue,
            sem: Semaphore::new()?,
            task_id: AtomicU64::new(0),
            in_q: TaskQueue::new(),
            out_q: TaskQueue::new(),
            notify: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            log: Log::reactor(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn max_queue(&self) -> i64 {
        self.max_queue
    }

    /// Create the notify channel and start the worker threads. Any
    /// failure here fails worker start.
    pub fn init(self: &Arc<Self>, driver: &dyn Driver) -> Result<()> {
        self.in_q.attach();
        self.out_q.attach();

        let notify = NotifyChannel::create(
            driver,
            Self::completion_handler,
            Arc::as_ptr(self) as usize,
        )?;
        let signal = notify.signaler();
        *self.notify.lock().unwrap() = Some(notify);

        let mut handles = self.handles.lock().unwrap();
        for n in 0..self.threads {
            let pool = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("evio-pool-{}-{}", self.name, n))
                .spawn(move || worker_cycle(pool, signal))
                .map_err(|e| {
                    ev_alert!(self.log, "thread pool \"{}\": spawn failed: {}", self.name, e);
                    EvioError::ThreadSpawn(e)
                })?;
            handles.push(handle);
        }

        Ok(())
    }

    /// Hand a task to the pool. Returns its id.
    ///
    /// Rejected when the task is already in flight or when `max_queue`
    /// tasks are already waiting; the task comes back with the error.
    pub fn post(&self, mut task: Box<Task>) -> std::result::Result<u64, PostError> {
        if task.event.active() {
            ev_alert!(self.log, "task #{} already active", task.id);
            return Err(PostError {
                error: EvioError::TaskActive(task.id),
                task: Some(task),
            });
        }

        let waiting = match self.sem.value() {
            Ok(v) => v,
            Err(error) => return Err(PostError { error, task: Some(task) }),
        };

        if waiting >= self.max_queue {
            ev_error!(
                self.log,
                "thread pool \"{}\" queue overflow: {} tasks waiting",
                self.name,
                waiting
            );
            return Err(PostError {
                error: EvioError::QueueOverflow {
                    pool: self.name.clone(),
                    waiting,
                },
                task: Some(task),
            });
        }

        task.event.set_active(true);
        task.id = self.task_id.fetch_add(1, Ordering::Relaxed);
        let id = task.id;

        // Safety: post runs on the single submitting thread; ownership
        // moves to the queue.
        unsafe { self.in_q.enqueue(Box::into_raw(task)) };

        ev_debug!(self.log, "task #{} added to thread pool \"{}\"", id, self.name);

        if let Err(error) = self.sem.post() {
            // The task is already queued; the pool is unusable now.
            ev_alert!(self.log, "thread pool \"{}\": sem_post failed", self.name);
            return Err(PostError { error, task: None });
        }

        Ok(id)
    }

    /// Stop the workers and release the pool's resources: one poison
    /// task per thread (bypassing `max_queue`), join, drop whatever
    /// never ran.
    pub fn destroy(&self) {
        for _ in 0..self.threads {
            let pill = Box::into_raw(Task::poison_pill());
            // Safety: destroy runs on the submitting thread.
            unsafe { self.in_q.enqueue(pill) };
            if self.sem.post().is_err() {
                ev_alert!(self.log, "thread pool \"{}\": sem_post failed at destroy", self.name);
            }
        }

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for h in handles {
            let _ = h.join();
        }

        // Safety: workers are gone and the reactor will not drain this
        // pool again.
        let dropped = unsafe { self.in_q.drain_and_drop() + self.out_q.drain_and_drop() };
        if dropped > 0 {
            ev_debug!(
                self.log,
                "thread pool \"{}\" dropped {} tasks at destroy",
                self.name,
                dropped
            );
        }

        *self.notify.lock().unwrap() = None;
    }

    /// Bound to the notify event: drains the completion queue on the
    /// reactor thread and fires each task's completion event.
    fn completion_handler(ev: &mut Event) {
        ev.set_ready(false);
        let conn = ev.data as *const Conn;
        // Safety: the notify pseudo-connection's `data` carries the
        // pool pointer, kept alive by the pool set until exit_worker.
        let tp = unsafe { &*((*conn).data as *const ThreadPool) };

        ev_debug!(tp.log, "thread pool \"{}\" handler", tp.name);

        if let Some(notify) = tp.notify.lock().unwrap().as_ref() {
            let _ = notify.rearm();
        }

        loop {
            // Safety: single consumer, on the reactor thread.
            let task = unsafe { tp.out_q.dequeue_single() };
            if task.is_null() {
                return;
            }
            // Ownership returns from the queue; dropped after the
            // completion handler has run.
            let mut task = unsafe { Box::from_raw(task) };

            ev_debug!(
                tp.log,
                "run completion handler for task #{} in thread pool \"{}\"",
                task.id,
                tp.name
            );

            task.event.set_complete(true);
            task.event.set_active(false);

            let handler = task.event.handler;
            handler(&mut task.event);
        }
    }
}

/// Worker thread body: semaphore-gated dequeue, execute, publish the
/// completion, wake the reactor.
fn worker_cycle(tp: Arc<ThreadPool>, notify: NotifySignal) {
    let log = Log::for_new_thread();

    ev_debug!(log, "thread {} of thread pool \"{}\" started", log.thread, tp.name);

    if let Err(e) = signal::block_all() {
        ev_alert!(log, "thread pool \"{}\": {}", tp.name, e);
        return;
    }

    loop {
        if tp.sem.wait().is_err() {
            ev_alert!(log, "thread pool \"{}\": sem_wait failed", tp.name);
            return;
        }

        // Safety: the semaphore says a task is (or is about to be)
        // queued; ownership transfers to this thread.
        let task = unsafe { tp.in_q.dequeue_spin() };
        let t = unsafe { &mut *task };

        if t.poison {
            ev_debug!(log, "thread {} of thread pool \"{}\" exiting", log.thread, tp.name);
            drop(unsafe { Box::from_raw(task) });
            return;
        }

        ev_debug!(log, "run task #{} in thread pool \"{}\"", t.id, tp.name);

        (t.handler)(t.ctx.as_mut(), &log);

        ev_debug!(log, "complete task #{} in thread pool \"{}\"", t.id, tp.name);

        t.next.store(std::ptr::null_mut(), Ordering::Relaxed);

        // Everything the handler wrote must be visible before the task
        // is reachable from the completion queue.
        publication_fence();

        // Safety: ownership moves to the completion queue.
        unsafe { tp.out_q.enqueue_multi(task) };

        if let Err(e) = notify.signal() {
            ev_alert!(log, "thread pool \"{}\": notify failed: {}", tp.name, e);
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use evio_runtime::EpollDriver;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread::ThreadId;
    use std::time::{Duration, Instant};

    struct Shared {
        completed: AtomicUsize,
        seen_mask: AtomicUsize,
        reactor_tid: ThreadId,
        gate: AtomicBool,
        started: AtomicUsize,
    }

    impl Shared {
        fn new() -> Arc<Shared> {
            Arc::new(Shared {
                completed: AtomicUsize::new(0),
                seen_mask: AtomicUsize::new(0),
                reactor_tid: std::thread::current().id(),
                gate: AtomicBool::new(true),
                started: AtomicUsize::new(0),
            })
        }
    }

    struct Ctx {
        i: usize,
        shared: Arc<Shared>,
    }

    fn sleepy_work(ctx: &mut (dyn Any + Send), _log: &Log) {
        let c = ctx.downcast_mut::<Ctx>().unwrap();
        c.shared.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
    }

    fn gated_work(ctx: &mut (dyn Any + Send), _log: &Log) {
        let c = ctx.downcast_mut::<Ctx>().unwrap();
        c.shared.started.fetch_add(1, Ordering::SeqCst);
        while c.shared.gate.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn instant_work(ctx: &mut (dyn Any + Send), _log: &Log) {
        let c = ctx.downcast_mut::<Ctx>().unwrap();
        c.shared.started.fetch_add(1, Ordering::SeqCst);
    }

    fn record_completion(ev: &mut Event) {
        assert!(ev.complete());
        assert!(!ev.active());
        // Safety: the context outlives the completion handler.
        let c = unsafe { &*(ev.data as *const Ctx) };
        assert_eq!(std::thread::current().id(), c.shared.reactor_tid);
        c.shared.seen_mask.fetch_or(1 << c.i, Ordering::SeqCst);
        c.shared.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn drain_until(
        driver: &EpollDriver,
        shared: &Shared,
        want: usize,
        budget: Duration,
    ) -> usize {
        let start = Instant::now();
        let mut wakeups = 0;
        while shared.completed.load(Ordering::SeqCst) < want {
            assert!(start.elapsed() < budget, "reactor drain timed out");
            let stats = driver.process(Some(50)).unwrap();
            if stats.dispatched > 0 {
                wakeups += 1;
            }
        }
        wakeups
    }

    #[test]
    fn test_offload_round_trip() {
        let driver = EpollDriver::new(64).unwrap();
        let pool = Arc::new(ThreadPool::new("default", 2, 4).unwrap());
        pool.init(&driver).unwrap();

        let shared = Shared::new();
        for i in 0..4 {
            let task = Task::new(
                Ctx { i, shared: Arc::clone(&shared) },
                sleepy_work,
                record_completion,
            );
            pool.post(task).unwrap();
        }

        drain_until(&driver, &shared, 4, Duration::from_secs(5));
        assert_eq!(shared.seen_mask.load(Ordering::SeqCst), 0b1111);

        pool.destroy();
    }

    #[test]
    fn test_queue_overflow_bound() {
        // threads=1, max_queue=3. One task in flight plus three
        // waiting; the next post must fail and hand the task back.
        let driver = EpollDriver::new(64).unwrap();
        let pool = Arc::new(ThreadPool::new("bounded", 1, 3).unwrap());
        pool.init(&driver).unwrap();

        let shared = Shared::new();
        let mk = |i: usize| {
            Task::new(
                Ctx { i, shared: Arc::clone(&shared) },
                gated_work,
                record_completion,
            )
        };

        pool.post(mk(0)).unwrap();
        let start = Instant::now();
        while shared.started.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::yield_now();
        }

        // Queue depth 0, 1, 2 at post time: all under the cap.
        pool.post(mk(1)).unwrap();
        pool.post(mk(2)).unwrap();
        pool.post(mk(3)).unwrap();

        // Depth 3 == max_queue: rejected.
        let err = pool.post(mk(4)).unwrap_err();
        match err.error {
            EvioError::QueueOverflow { ref pool, waiting } => {
                assert_eq!(pool, "bounded");
                assert_eq!(waiting, 3);
            }
            other => panic!("expected overflow, got {}", other),
        }
        assert!(!err.task.unwrap().event.active());

        shared.gate.store(false, Ordering::Release);
        drain_until(&driver, &shared, 4, Duration::from_secs(5));

        pool.destroy();
    }

    #[test]
    fn test_task_ids_monotonic() {
        let driver = EpollDriver::new(16).unwrap();
        let pool = Arc::new(ThreadPool::new("ids", 1, 100).unwrap());
        pool.init(&driver).unwrap();

        let shared = Shared::new();
        let mut prev = None;
        for i in 0..10 {
            let id = pool
                .post(Task::new(
                    Ctx { i, shared: Arc::clone(&shared) },
                    instant_work,
                    record_completion,
                ))
                .unwrap();
            if let Some(p) = prev {
                assert!(id > p, "ids must increase per pool");
            }
            prev = Some(id);
        }

        drain_until(&driver, &shared, 10, Duration::from_secs(5));
        pool.destroy();
    }

    #[test]
    fn test_notify_coalescing_end_to_end() {
        // 100 near-instant tasks: the reactor must see at least one
        // wake-up and at most one per task, and drain all completions.
        let driver = EpollDriver::new(64).unwrap();
        let pool = Arc::new(ThreadPool::new("burst", 4, 1024).unwrap());
        pool.init(&driver).unwrap();

        let shared = Shared::new();
        for i in 0..100 {
            pool.post(Task::new(
                Ctx { i: i % 60, shared: Arc::clone(&shared) },
                instant_work,
                record_completion,
            ))
            .unwrap();
        }

        let wakeups = drain_until(&driver, &shared, 100, Duration::from_secs(5));
        assert!(wakeups >= 1);
        assert!(wakeups <= 100);
        assert_eq!(shared.completed.load(Ordering::SeqCst), 100);

        pool.destroy();
    }

    #[test]
    fn test_destroy_joins_workers() {
        let driver = EpollDriver::new(8).unwrap();
        let pool = Arc::new(ThreadPool::new("stop", 3, 10).unwrap());
        pool.init(&driver).unwrap();
        // No tasks at all: destroy must still unblock and join all
        // three workers.
        pool.destroy();
        assert!(pool.handles.lock().unwrap().is_empty());
    }

    #[test]
    fn test_double_post_rejected() {
        let driver = EpollDriver::new(8).unwrap();
        let pool = Arc::new(ThreadPool::new("dup", 1, 10).unwrap());
        pool.init(&driver).unwrap();

        let shared = Shared::new();
        let mut task = Task::new(
            Ctx { i: 0, shared: Arc::clone(&shared) },
            instant_work,
            record_completion,
        );
        task.event.set_active(true);

        let err = pool.post(task).unwrap_err();
        assert!(matches!(err.error, EvioError::TaskActive(_)));

        pool.destroy();
    }
}
