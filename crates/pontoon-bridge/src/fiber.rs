//! Cooperative pseudo-thread for the privileged context.
//!
//! The privileged context is the only place jobs can run, so code that
//! runs on it must never block on a job. The escape hatch is a single
//! fiber: [`fork`] transfers control into an entry function on its own
//! stack, [`block`] suspends the fiber and returns control to the main
//! state, and [`resume`] re-enters the fiber at its last block point.
//! The fiber and the main state never execute concurrently; switching is
//! synchronous and explicit (ucontext swap, no OS thread ever parks).
//!
//! All preconditions here are programming contracts: violating one is a
//! bug in the layer above, and fails fatally.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use libc::{getcontext, makecontext, swapcontext, ucontext_t};
use tracing::debug;

/// Refuse stacks that cannot hold a signal frame plus any real work.
const MIN_STACK_BYTES: usize = 32 * 1024;

struct Fiber {
    main_ctx: Box<ucontext_t>,
    fiber_ctx: Box<ucontext_t>,
    // Owns the fiber stack; must outlive any context that points into it.
    stack: Box<[u8]>,
    entry: Option<Box<dyn FnOnce()>>,
    forked: bool,
    active: bool,
}

thread_local! {
    static FIBER: Cell<*mut Fiber> = const { Cell::new(std::ptr::null_mut()) };
}

/// True while a fiber has been forked and has not yet finished.
pub fn is_forked() -> bool {
    let ptr = FIBER.with(Cell::get);
    !ptr.is_null() && unsafe { (*ptr).forked }
}

/// True while execution is currently inside the fiber.
/// Only meaningful on the privileged thread.
pub fn is_active() -> bool {
    let ptr = FIBER.with(Cell::get);
    !ptr.is_null() && unsafe { (*ptr).active }
}

/// Fork the pseudo-thread with the default stack size from config.
pub fn fork<F: FnOnce() + 'static>(entry: F) {
    let kib = pontoon_config::config().bridge.pseudo_stack_kib;
    fork_with_stack(kib * 1024, entry);
}

/// Fork the pseudo-thread onto a dedicated stack of `stack_bytes` and run
/// `entry` on it until it first blocks or finishes.
///
/// Only one fiber may exist at a time; forking while one is live is fatal.
pub fn fork_with_stack<F: FnOnce() + 'static>(stack_bytes: usize, entry: F) {
    assert!(!is_forked(), "a pseudo-thread is already forked");
    assert!(
        stack_bytes >= MIN_STACK_BYTES,
        "pseudo-thread stack of {stack_bytes} bytes is too small"
    );

    // Drop any previous, finished fiber before installing the new one.
    let old = FIBER.with(Cell::get);
    if !old.is_null() {
        FIBER.with(|f| f.set(std::ptr::null_mut()));
        drop(unsafe { Box::from_raw(old) });
    }

    let fiber = Box::new(Fiber {
        main_ctx: Box::new(unsafe { std::mem::zeroed() }),
        fiber_ctx: Box::new(unsafe { std::mem::zeroed() }),
        stack: vec![0u8; stack_bytes].into_boxed_slice(),
        entry: Some(Box::new(entry)),
        forked: false,
        active: false,
    });
    let ptr = Box::into_raw(fiber);
    FIBER.with(|f| f.set(ptr));

    debug!(stack_bytes, "forking pseudo-thread");
    unsafe {
        if getcontext(&mut *(*ptr).fiber_ctx) != 0 {
            panic!("getcontext failed");
        }
        (*ptr).fiber_ctx.uc_stack.ss_sp = (*ptr).stack.as_mut_ptr() as *mut libc::c_void;
        (*ptr).fiber_ctx.uc_stack.ss_size = (&(*ptr).stack).len();
        (*ptr).fiber_ctx.uc_link = &mut *(*ptr).main_ctx;
        makecontext(&mut *(*ptr).fiber_ctx, fiber_main, 0);

        (*ptr).forked = true;
        (*ptr).active = true;
        if swapcontext(&mut *(*ptr).main_ctx, &*(*ptr).fiber_ctx) != 0 {
            panic!("swapcontext into pseudo-thread failed");
        }
        (*ptr).active = false;
    }
}

/// Suspend the fiber and hand control back to the main state.
/// The only way to leave the fiber before its entry returns.
pub fn block() {
    let ptr = current();
    unsafe {
        assert!((*ptr).forked, "block() with no pseudo-thread forked");
        assert!((*ptr).active, "block() called outside the pseudo-thread");
        if swapcontext(&mut *(*ptr).fiber_ctx, &*(*ptr).main_ctx) != 0 {
            panic!("swapcontext out of pseudo-thread failed");
        }
        // Resumed.
        (*ptr).active = true;
    }
}

/// Re-enter the fiber at its last block point. Returns when the fiber
/// blocks again or finishes.
pub fn resume() {
    let ptr = current();
    unsafe {
        assert!((*ptr).forked, "resume() with no pseudo-thread forked");
        assert!(
            !(*ptr).active,
            "resume() called from inside the pseudo-thread"
        );
        if swapcontext(&mut *(*ptr).main_ctx, &*(*ptr).fiber_ctx) != 0 {
            panic!("swapcontext into pseudo-thread failed");
        }
        (*ptr).active = false;
    }
}

fn current() -> *mut Fiber {
    let ptr = FIBER.with(Cell::get);
    assert!(!ptr.is_null(), "no pseudo-thread state on this thread");
    ptr
}

extern "C" fn fiber_main() {
    let ptr = FIBER.with(Cell::get);
    unsafe {
        let entry = (*ptr).entry.take().expect("fiber entry already consumed");
        // Unwinding across the context switch is undefined; a panic on the
        // fiber stack is fatal like every other contract violation here.
        if catch_unwind(AssertUnwindSafe(entry)).is_err() {
            std::process::abort();
        }
        debug!("pseudo-thread finished");
        (*ptr).forked = false;
        (*ptr).active = false;
        // Dead. There is no valid frame to return into on this stack, so
        // keep kicking control back to the main state.
        loop {
            swapcontext(&mut *(*ptr).fiber_ctx, &*(*ptr).main_ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fork_runs_entry_to_completion() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        fork_with_stack(MIN_STACK_BYTES, move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!is_forked());
        assert!(!is_active());
    }

    #[test]
    fn test_block_and_resume_round_trips() {
        let stage = Arc::new(AtomicUsize::new(0));
        let stage2 = stage.clone();
        fork_with_stack(64 * 1024, move || {
            stage2.store(1, Ordering::SeqCst);
            block();
            stage2.store(2, Ordering::SeqCst);
            block();
            stage2.store(3, Ordering::SeqCst);
        });
        assert_eq!(stage.load(Ordering::SeqCst), 1);
        assert!(is_forked());
        assert!(!is_active());

        resume();
        assert_eq!(stage.load(Ordering::SeqCst), 2);
        assert!(is_forked());

        resume();
        assert_eq!(stage.load(Ordering::SeqCst), 3);
        assert!(!is_forked());
    }

    #[test]
    fn test_refork_after_finish() {
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = total.clone();
            fork_with_stack(MIN_STACK_BYTES, move || {
                total.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(total.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[should_panic(expected = "already forked")]
    fn test_double_fork_is_fatal() {
        fork_with_stack(64 * 1024, || {
            block();
        });
        fork_with_stack(64 * 1024, || {});
    }

    #[test]
    #[should_panic(expected = "resume()")]
    fn test_resume_without_fork_is_fatal() {
        fork_with_stack(MIN_STACK_BYTES, || {});
        // Fiber already finished; nothing to resume.
        resume();
    }

    #[test]
    #[should_panic(expected = "no pseudo-thread state")]
    fn test_block_without_fiber_is_fatal() {
        block();
    }
}
