//! # pontoon-bridge
//!
//! Main-thread job execution bridge.
//!
//! Sandboxed runtimes give us exactly one privileged execution context
//! (the host's main thread). Worker threads hand work to it as [`Job`]s
//! and block until the job reports a result; the host pumps the queue by
//! calling [`MainThreadRunner::do_work`] from its scheduled callback.
//!
//! Code that already runs *on* the privileged context cannot block on a
//! job without deadlocking against itself, so the bridge also provides a
//! single cooperative [`fiber`] ("pseudo-thread"): a program forked onto
//! the fiber may issue blocking `run_job` calls that suspend the fiber
//! while the privileged context keeps draining work.

pub mod fiber;

mod job;
mod queue;
mod runner;

pub use job::{job_fn, Job, JobHandle};
pub use queue::JobQueue;
pub use runner::{HostContext, MainThreadRunner, ThreadHost};
