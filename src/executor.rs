//! Execution contexts: where continuations run.
//!
//! An [`Executor`] accepts a [`Job`] and runs it later, on some thread it owns.
//! It must never run the job inline on the caller's stack; the promise core
//! relies on that to keep `resolve` and `then` free of re-entrancy.
use std::cell::Cell;
use std::env;
use std::io;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use once_cell::sync::Lazy;

use crate::fault;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A shared handle to an [`Executor`].
pub type ExecutionContext = Arc<dyn Executor>;

pub trait Executor: Send + Sync {
    /// Queues `job` to run asynchronously.
    fn execute(&self, job: Job);
}

const WORKERS_ENV: &str = "COREPROMISE_WORKERS";
const THREAD_NAME_ENV: &str = "COREPROMISE_THREAD_NAME";
const STACK_SIZE_ENV: &str = "COREPROMISE_STACK_SIZE";

thread_local! {
    static ON_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a [`ThreadPool`] worker.
pub(crate) fn on_pool_worker() -> bool {
    ON_POOL_WORKER.with(Cell::get)
}

/// Settings for a [`ThreadPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub thread_name: String,
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(4, NonZeroUsize::get),
            thread_name: "corepromise".to_owned(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `COREPROMISE_WORKERS`, `COREPROMISE_THREAD_NAME`
    /// and `COREPROMISE_STACK_SIZE`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(workers) = parse_var::<usize>(WORKERS_ENV, lookup(WORKERS_ENV)).filter(|n| *n > 0) {
            config.workers = workers;
        }
        if let Some(name) = lookup(THREAD_NAME_ENV) {
            if !name.is_empty() {
                config.thread_name = name;
            }
        }
        if let Some(stack_size) = parse_var::<usize>(STACK_SIZE_ENV, lookup(STACK_SIZE_ENV)) {
            config.stack_size = Some(stack_size);
        }
        config
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring invalid pool configuration value");
            None
        }
    }
}

/// A fixed set of worker threads draining one FIFO queue.
///
/// Dropping the pool lets the workers finish what is already queued and then
/// exit; it does not join them.
#[derive(Debug)]
pub struct ThreadPool {
    sender: Sender<Job>,
    name: String,
    workers: usize,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let workers = config.workers.max(1);
        for index in 0..workers {
            let mut builder = thread::Builder::new().name(format!("{}-{index}", config.thread_name));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let receiver = receiver.clone();
            let name = config.thread_name.clone();
            builder.spawn(move || worker_loop(&name, receiver))?;
        }
        tracing::debug!(pool = %config.thread_name, workers, "started thread pool");
        Ok(Self {
            sender,
            name: config.thread_name,
            workers,
        })
    }

    /// A single-worker pool: jobs run one at a time, in submission order.
    pub fn serial(name: impl Into<String>) -> io::Result<Self> {
        Self::new(PoolConfig::default().workers(1).thread_name(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        // Workers only exit once every sender is gone, so this cannot fail
        // while `self` is alive.
        if self.sender.send(job).is_err() {
            tracing::error!(pool = %self.name, "thread pool queue is closed, dropping job");
        }
    }
}

fn worker_loop(name: &str, receiver: Receiver<Job>) {
    ON_POOL_WORKER.with(|flag| flag.set(true));
    for job in receiver.iter() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(
                pool = %name,
                panic = %fault::describe(payload.as_ref()),
                "job panicked on pool worker"
            );
        }
    }
    tracing::trace!(pool = %name, "pool worker exiting");
}

static BACKGROUND: Lazy<Arc<ThreadPool>> = Lazy::new(|| {
    let pool = ThreadPool::new(PoolConfig::from_env())
        .expect("failed to spawn the background promise pool");
    Arc::new(pool)
});

/// The process-wide default context used when no context is named.
///
/// It has several workers, so two continuations registered on one promise are
/// started in registration order but may run concurrently or finish out of
/// order. Name a [`ThreadPool::serial`] context when order matters.
pub fn background() -> ExecutionContext {
    let pool: Arc<ThreadPool> = Arc::clone(&BACKGROUND);
    pool
}
