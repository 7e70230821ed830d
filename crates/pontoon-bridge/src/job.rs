use std::sync::{Arc, Condvar, Mutex};

use crate::fiber;
use crate::runner::HostContext;

/// A unit of work executed on the privileged context.
///
/// `run` is invoked exactly once, in FIFO order relative to other
/// submitted jobs. The job must eventually call [`JobHandle::complete`],
/// either inside `run` or later from a host callback that stashed the
/// handle.
pub trait Job: Send {
    fn run(&mut self, handle: JobHandle);
}

/// Wrap a closure as a boxed [`Job`].
pub fn job_fn<F>(f: F) -> Box<dyn Job>
where
    F: FnOnce(JobHandle) + Send + 'static,
{
    struct FnJob<F>(Option<F>);
    impl<F: FnOnce(JobHandle) + Send> Job for FnJob<F> {
        fn run(&mut self, handle: JobHandle) {
            let f = self.0.take().expect("job ran twice");
            f(handle);
        }
    }
    Box::new(FnJob(Some(f)))
}

/// How the submitting caller waits for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitMode {
    /// Worker thread, parked on the entry's condvar.
    Worker,
    /// Pseudo-thread on the privileged context, suspended via the fiber.
    Pseudo,
    /// Fire-and-forget; nobody waits.
    Async,
}

pub(crate) struct EntryState {
    done: bool,
    result: i32,
    /// Job retained by the runner when `run` returned before completing;
    /// dropped by `complete`.
    job: Option<Box<dyn Job>>,
}

/// Completion state shared between the runner, the waiter and the handle.
pub(crate) struct JobEntry {
    mode: SubmitMode,
    host: Arc<dyn HostContext>,
    state: Mutex<EntryState>,
    done_cond: Condvar,
}

impl JobEntry {
    pub(crate) fn new(mode: SubmitMode, host: Arc<dyn HostContext>) -> Self {
        Self {
            mode,
            host,
            state: Mutex::new(EntryState {
                done: false,
                result: 0,
                job: None,
            }),
            done_cond: Condvar::new(),
        }
    }

    /// Worker-thread wait: park until `complete` signals, return the result.
    pub(crate) fn wait(&self) -> i32 {
        let mut state = self.state.lock().unwrap();
        while !state.done {
            state = self.done_cond.wait(state).unwrap();
        }
        state.result
    }

    /// Pseudo-thread result pickup after the fiber was resumed.
    pub(crate) fn take_result(&self) -> i32 {
        let state = self.state.lock().unwrap();
        assert!(state.done, "pseudo-thread resumed before job completion");
        state.result
    }

    /// Called by the runner after `run` returned: keep the job alive for a
    /// deferred completion, or drop it if the entry is already done.
    pub(crate) fn retain_job_if_pending(&self, job: Box<dyn Job>) {
        let dropped = {
            let mut state = self.state.lock().unwrap();
            if state.done {
                Some(job)
            } else {
                state.job = Some(job);
                None
            }
        };
        drop(dropped);
    }

    fn complete(&self, result: i32) {
        let retained = {
            let mut state = self.state.lock().unwrap();
            debug_assert!(!state.done, "job completed twice");
            state.done = true;
            state.result = result;
            state.job.take()
        };
        drop(retained);

        match self.mode {
            SubmitMode::Worker => {
                self.done_cond.notify_one();
            }
            SubmitMode::Pseudo => {
                // Completion for a pseudo-thread job hands control back to
                // the fiber instead of signalling a condvar.
                assert!(
                    self.host.is_privileged_thread(),
                    "pseudo-thread job completed off the privileged context"
                );
                fiber::resume();
            }
            SubmitMode::Async => {}
        }
    }
}

/// Opaque completion token handed to [`Job::run`].
///
/// Consuming `complete` makes double completion through one handle
/// unrepresentable; the entry state asserts against a second completion
/// arriving by any other means.
pub struct JobHandle {
    entry: Arc<JobEntry>,
}

impl JobHandle {
    pub(crate) fn new(entry: Arc<JobEntry>) -> Self {
        Self { entry }
    }

    /// Report the job's result and release the waiter, if any.
    pub fn complete(self, result: i32) {
        self.entry.complete(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    struct TestHost;
    impl HostContext for TestHost {
        fn schedule_wakeup(&self) {}
        fn is_privileged_thread(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_worker_wait_observes_result() {
        let entry = Arc::new(JobEntry::new(SubmitMode::Worker, Arc::new(TestHost)));
        let waiter = {
            let entry = entry.clone();
            thread::spawn(move || entry.wait())
        };
        JobHandle::new(entry).complete(42);
        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn test_async_completion_drops_retained_job() {
        static DROPPED: AtomicBool = AtomicBool::new(false);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPPED.store(true, Ordering::SeqCst);
            }
        }
        let tracked = Tracked;
        let entry = Arc::new(JobEntry::new(SubmitMode::Async, Arc::new(TestHost)));
        entry.retain_job_if_pending(job_fn(move |_| {
            let _keep = &tracked;
        }));
        assert!(!DROPPED.load(Ordering::SeqCst));
        JobHandle::new(entry).complete(0);
        assert!(DROPPED.load(Ordering::SeqCst));
    }
}
