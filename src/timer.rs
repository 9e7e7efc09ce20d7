//! Deadline-ordered timer thread backing [`after`](crate::after).
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::executor::Job;

struct Entry {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct Queue {
    entries: BinaryHeap<Reverse<Entry>>,
    /// Jobs whose deadline lies beyond what `Instant` can represent. They are
    /// held, never run, so whatever they capture stays alive.
    unreachable: Vec<Job>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    changed: Condvar,
}

pub(crate) struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    fn start() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            changed: Condvar::new(),
        });
        let worker = shared.clone();
        thread::Builder::new()
            .name("corepromise-timer".to_owned())
            .spawn(move || run(&worker))?;
        Ok(Self { shared })
    }

    #[cfg(test)]
    fn parked(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).unreachable.len()
    }

    /// Runs `job` on the timer thread once `delay` has elapsed. Jobs with the
    /// same deadline run in scheduling order.
    pub(crate) fn schedule(&self, delay: Duration, job: Job) {
        let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(delay) else {
            tracing::debug!(?delay, "timer delay out of range, job will never run");
            queue.unreachable.push(job);
            return;
        };
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.entries.push(Reverse(Entry { deadline, seq, job }));
        drop(queue);
        self.shared.changed.notify_one();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).shutdown = true;
        self.shared.changed.notify_one();
    }
}

fn run(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if queue.shutdown {
                    tracing::trace!(pending = queue.entries.len(), "timer thread exiting");
                    return;
                }
                let now = Instant::now();
                let wait = match queue.entries.peek() {
                    Some(Reverse(entry)) if entry.deadline <= now => break,
                    Some(Reverse(entry)) => Some(entry.deadline - now),
                    None => None,
                };
                queue = match wait {
                    Some(timeout) => {
                        shared
                            .changed
                            .wait_timeout(queue, timeout)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                    None => shared.changed.wait(queue).unwrap_or_else(PoisonError::into_inner),
                };
            }
            queue.entries.pop().map(|Reverse(entry)| entry.job)
        };
        if let Some(job) = job {
            job();
        }
    }
}

static TIMER: Lazy<Timer> =
    Lazy::new(|| Timer::start().expect("failed to spawn the promise timer thread"));

pub(crate) fn global() -> &'static Timer {
    &TIMER
}
