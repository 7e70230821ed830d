use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::job::{Job, JobEntry};

pub(crate) struct QueuedJob {
    pub(crate) job: Box<dyn Job>,
    pub(crate) entry: Arc<JobEntry>,
}

/// Thread-safe FIFO of pending jobs.
///
/// The lock is held only for enqueue/dequeue, never across a job's
/// execution, so jobs may themselves submit work without deadlocking.
pub struct JobQueue {
    inner: Mutex<VecDeque<QueuedJob>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a job; returns true if the queue was empty beforehand.
    /// The empty-to-non-empty transition is what triggers a host wakeup.
    pub(crate) fn push(&self, queued: QueuedJob) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was_empty = inner.is_empty();
        inner.push_back(queued);
        was_empty
    }

    pub(crate) fn pop(&self) -> Option<QueuedJob> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
