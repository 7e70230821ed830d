use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::fiber;
use crate::job::{Job, JobEntry, JobHandle, SubmitMode};
use crate::queue::{JobQueue, QueuedJob};

/// The privileged-context collaborator.
///
/// The host owns the single privileged execution context. The bridge only
/// needs two things from it: a way to schedule a callback on that context
/// (which must eventually invoke [`MainThreadRunner::do_work`] — liveness
/// is the host's guarantee), and a predicate identifying it.
pub trait HostContext: Send + Sync {
    /// Schedule a callback to run on the privileged context.
    /// Called at most once per empty-to-non-empty queue transition.
    fn schedule_wakeup(&self);

    /// Whether the calling thread is the privileged context.
    fn is_privileged_thread(&self) -> bool;
}

/// Plain-thread host for embedders and tests that pump `do_work` from a
/// loop of their own: the constructing thread is the privileged context
/// and wakeups latch a flag for the loop to observe.
pub struct ThreadHost {
    main: ThreadId,
    pending: AtomicBool,
}

impl ThreadHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            main: thread::current().id(),
            pending: AtomicBool::new(false),
        })
    }

    /// Consume a pending wakeup, if one was scheduled.
    pub fn take_wakeup(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl HostContext for ThreadHost {
    fn schedule_wakeup(&self) {
        self.pending.store(true, Ordering::Release);
    }

    fn is_privileged_thread(&self) -> bool {
        thread::current().id() == self.main
    }
}

/// Executes submitted [`Job`]s on the privileged context.
pub struct MainThreadRunner {
    host: Arc<dyn HostContext>,
    queue: JobQueue,
}

impl MainThreadRunner {
    pub fn new(host: Arc<dyn HostContext>) -> Self {
        Self {
            host,
            queue: JobQueue::new(),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostContext> {
        &self.host
    }

    /// Submit `job` and block until it completes; returns the result code
    /// its completion reported.
    ///
    /// Callable from any worker thread, or from the privileged context
    /// while a pseudo-thread is active (the fiber suspends instead of the
    /// thread parking). Calling it on the privileged context with no
    /// active pseudo-thread would deadlock the only context able to drain
    /// the queue, and is fatal.
    pub fn run_job(&self, job: Box<dyn Job>) -> i32 {
        let on_privileged = self.host.is_privileged_thread();
        let on_fiber = on_privileged && fiber::is_active();
        assert!(
            !on_privileged || on_fiber,
            "run_job on the privileged context requires an active pseudo-thread"
        );

        let mode = if on_fiber {
            SubmitMode::Pseudo
        } else {
            SubmitMode::Worker
        };
        let entry = Arc::new(JobEntry::new(mode, self.host.clone()));
        self.enqueue(job, entry.clone());

        if on_fiber {
            fiber::block();
            entry.take_result()
        } else {
            entry.wait()
        }
    }

    /// Submit `job` without waiting. The job must complete itself (inside
    /// `run` or from a stashed handle later); the runner reclaims the job
    /// and its entry at completion.
    pub fn run_job_async(&self, job: Box<dyn Job>) {
        let entry = Arc::new(JobEntry::new(SubmitMode::Async, self.host.clone()));
        self.enqueue(job, entry);
    }

    fn enqueue(&self, job: Box<dyn Job>, entry: Arc<JobEntry>) {
        let was_empty = self.queue.push(QueuedJob { job, entry });
        trace!(was_empty, "job enqueued");
        if was_empty {
            self.host.schedule_wakeup();
        }
    }

    /// Drain the queue, invoked from the privileged context whenever the
    /// host's scheduled callback fires. Returns whether any job ran; the
    /// host may use that to reschedule immediately or go idle.
    ///
    /// The queue lock is released around each job's execution, so jobs
    /// submitted *during* a job's run land on the queue normally and are
    /// picked up by this same drain.
    pub fn do_work(&self) -> bool {
        assert!(
            self.host.is_privileged_thread(),
            "do_work invoked off the privileged context"
        );

        let mut ran = 0usize;
        while let Some(QueuedJob { mut job, entry }) = self.queue.pop() {
            ran += 1;
            job.run(JobHandle::new(entry.clone()));
            // If the job deferred its completion, the entry keeps the job
            // alive until the stashed handle fires.
            entry.retain_job_if_pending(job);
        }
        if ran > 0 {
            debug!(jobs = ran, "drained job queue");
        }
        ran > 0
    }
}
