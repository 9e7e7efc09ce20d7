//! Small producers built on the public promise API.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::executor::{self, background, ExecutionContext};
use crate::{fault, timer, Outcome, Promise, PromiseError, RunLoop, Value};

/// A promise fulfilled with `()` once `delay` has elapsed. Never rejects.
///
/// A delay too large to represent as a deadline leaves the promise pending.
///
/// ```
/// use corepromise::{after, hang};
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// hang(&after(Duration::from_millis(10))).unwrap();
/// assert!(start.elapsed() >= Duration::from_millis(10));
/// ```
pub fn after(delay: Duration) -> Promise<()> {
    let (resolver, promise) = Promise::<()>::pending();
    timer::global().schedule(
        delay,
        Box::new(move || {
            resolver.fulfill(());
        }),
    );
    promise
}

/// Runs `work` on the background context.
pub fn dispatch<T, F>(work: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> T + Send + 'static,
{
    dispatch_on(background(), work)
}

/// Runs `work` on `context`, fulfilling with its return value or rejecting
/// with an [`ErrorKind::ExceptionCaught`](crate::ErrorKind) error if it panics.
pub fn dispatch_on<T, F>(context: ExecutionContext, work: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> T + Send + 'static,
{
    let (resolver, promise) = Promise::<T>::pending();
    context.execute(Box::new(move || {
        resolver.resolve(fault::capture(work).into());
    }));
    promise
}

/// Blocks the calling thread until `promise` settles, running the thread's
/// [`RunLoop`] meanwhile, and returns the outcome.
///
/// Meant for tests and tools. Calling it from a job running on a
/// [`ThreadPool`](crate::ThreadPool) can deadlock the pool if the promise
/// depends on work queued behind the caller.
pub fn hang<T: Value>(promise: &Promise<T>) -> Result<T, PromiseError> {
    if executor::on_pool_worker() {
        tracing::warn!(promise = %promise.id(), "hang called from a pool worker");
    }
    let run_loop = RunLoop::current();
    let slot: Arc<Mutex<Option<Outcome<T>>>> = Arc::new(Mutex::new(None));
    let fill = slot.clone();
    promise.subscribe(run_loop.clone(), move |outcome| {
        *fill.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    });
    loop {
        if let Some(outcome) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return outcome.into_result();
        }
        run_loop.run_until(|| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some());
    }
}
