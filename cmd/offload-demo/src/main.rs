//! Offload round-trip demo
//!
//! Drives the full evio stack on one worker:
//!   1. Parse a `thread_pool` directive and finalize the registry
//!   2. Build an epoll reactor and start the pools
//!   3. Post tasks that block on a worker thread
//!   4. Run the event loop until every completion handler has fired
//!
//! Run with EVIO_LOG_LEVEL=5 to watch the queue transitions.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use evio_core::event::Event;
use evio_core::log::Log;
use evio_pool::{PoolRegistry, Task};
use evio_runtime::{EpollDriver, ProcessRole, Reactor};

const TASKS: usize = 16;

const CONFIG: &str = "
# offload pools for this worker
thread_pool default threads=4 max_queue=1024
thread_pool slow threads=2 max_queue=8
";

struct DemoShared {
    completed: AtomicUsize,
}

struct DemoCtx {
    i: usize,
    checksum: u64,
    shared: Arc<DemoShared>,
}

/// Runs on a pool worker; free to block.
fn crunch(ctx: &mut (dyn Any + Send), log: &Log) {
    let c = ctx.downcast_mut::<DemoCtx>().expect("demo context");
    std::thread::sleep(Duration::from_millis(5));
    let mut sum = 0u64;
    for n in 0..=(c.i as u64) {
        sum = sum.wrapping_mul(31).wrapping_add(n);
    }
    c.checksum = sum;
    evio_core::ev_info!(*log, "crunched task {} -> {:#x}", c.i, sum);
}

/// Runs on the reactor once the task is done.
fn crunched(ev: &mut Event) {
    assert!(ev.complete());
    // Safety: the task context outlives its completion handler.
    let c = unsafe { &*(ev.data as *const DemoCtx) };
    println!("  task {:>2} complete on reactor: checksum {:#018x}", c.i, c.checksum);
    c.shared.completed.fetch_add(1, Ordering::SeqCst);
}

fn main() -> Result<()> {
    evio_core::log::init();

    println!("=== evio offload demo ===\n");

    let mut registry = PoolRegistry::new();
    registry.parse(CONFIG).map_err(|e| anyhow!("{}", e))?;
    registry.finalize().map_err(|e| anyhow!("{}", e))?;

    let driver = EpollDriver::new(256).context("create epoll driver")?;
    let reactor = Reactor::new(Box::new(driver));
    reactor.install();

    let pools = registry
        .init_worker(ProcessRole::Single, reactor.driver())
        .context("start thread pools")?;
    println!("started {} pools", pools.len());

    let pool = pools.get("default").expect("default pool exists");
    let shared = Arc::new(DemoShared {
        completed: AtomicUsize::new(0),
    });

    for i in 0..TASKS {
        let task = Task::new(
            DemoCtx {
                i,
                checksum: 0,
                shared: Arc::clone(&shared),
            },
            crunch,
            crunched,
        );
        let id = pool
            .post(task)
            .map_err(|e| anyhow!("post failed: {}", e.error))?;
        println!("posted task {} as #{}", i, id);
    }

    println!("\ndraining completions...");
    let start = Instant::now();
    while shared.completed.load(Ordering::SeqCst) < TASKS {
        if start.elapsed() > Duration::from_secs(10) {
            return Err(anyhow!("timed out waiting for completions"));
        }
        reactor.run_once(Some(100)).context("reactor cycle")?;
    }

    println!("\nall {} tasks completed; shutting down", TASKS);
    pools.exit_worker();
    Reactor::uninstall();

    Ok(())
}
