//! A manually driven, thread-owned execution context.
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::executor::{Executor, Job};

/// A FIFO job queue that only runs when its owning thread drives it.
///
/// Any thread may post to a run loop; jobs run on whichever thread calls
/// [`run_pending`](Self::run_pending) or [`run_until`](Self::run_until).
/// [`hang`](crate::hang) drives the calling thread's loop.
///
/// ```
/// use corepromise::{Promise, RunLoop};
///
/// let main = RunLoop::new();
/// let doubled = Promise::fulfilled(21).on(main.clone()).then(|v| v * 2);
/// main.run_until(|| doubled.is_settled());
/// assert_eq!(doubled.value(), Some(42));
/// ```
#[derive(Default)]
pub struct RunLoop {
    queue: Mutex<VecDeque<Job>>,
    ready: Condvar,
}

thread_local! {
    static CURRENT: Arc<RunLoop> = RunLoop::new();
}

/// Upper bound on a single idle wait, so predicates that depend on state
/// outside the loop are re-checked.
const IDLE_WAIT: Duration = Duration::from_millis(50);

impl RunLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The run loop belonging to the calling thread.
    pub fn current() -> Arc<Self> {
        CURRENT.with(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs the jobs queued at the time of the call and returns how many ran.
    /// Jobs posted while draining wait for the next call.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.lock());
        let count = batch.len();
        for job in batch {
            job();
        }
        count
    }

    /// Runs jobs, blocking while the queue is empty, until `done` returns true.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) {
        while !done() {
            let job = {
                let mut queue = self.lock();
                if queue.is_empty() {
                    queue = self
                        .ready
                        .wait_timeout(queue, IDLE_WAIT)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                queue.pop_front()
            };
            if let Some(job) = job {
                job();
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for RunLoop {
    fn execute(&self, job: Job) {
        self.lock().push_back(job);
        self.ready.notify_one();
    }
}
