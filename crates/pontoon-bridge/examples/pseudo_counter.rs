//! Runs a small program body on the pseudo-thread, submitting blocking
//! jobs that the privileged context drains.
//!
//! Usage:
//!   cargo run --example pseudo_counter [iterations]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use pontoon_bridge::{fiber, job_fn, MainThreadRunner, ThreadHost};
use pontoon_config::logging::{init_logging, LogLevel};

fn main() -> Result<()> {
    init_logging(LogLevel::Debug);

    let iterations: i32 = std::env::args()
        .nth(1)
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(10);

    let host = ThreadHost::new();
    let runner = Arc::new(MainThreadRunner::new(host.clone()));
    let counter = Arc::new(AtomicI32::new(0));

    let stack_kib = pontoon_config::config().bridge.pseudo_stack_kib;
    println!("forking pseudo-thread with a {stack_kib} KiB stack");

    {
        let runner = runner.clone();
        let counter = counter.clone();
        fiber::fork(move || {
            for _ in 0..iterations {
                let counter = counter.clone();
                let ret = runner.run_job(job_fn(move |handle| {
                    let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    handle.complete(value);
                }));
                println!("pseudo-thread observed result {ret}");
            }
        });
    }

    // The host's event loop: pump whenever a wakeup was scheduled.
    while counter.load(Ordering::SeqCst) < iterations {
        if host.take_wakeup() {
            runner.do_work();
        } else {
            std::thread::yield_now();
        }
    }

    println!("done: {} jobs executed", counter.load(Ordering::SeqCst));
    Ok(())
}
