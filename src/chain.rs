//! Chained continuations: `then`, `catch_error` and `finally`.
//!
//! Every registration derives a new promise from the upstream one. When the
//! upstream settles, the matching handler runs on the chosen execution context
//! and its result settles the derived promise. An outcome with no matching
//! handler is forwarded unchanged, a panicking handler rejects the derived
//! promise, and a handler returning a promise makes the derived promise adopt
//! that promise's eventual outcome.
use crate::executor::{background, ExecutionContext};
use crate::{Outcome, Promise, PromiseError, Resolver, Value};

/// What a reaction hands back to settle its derived promise.
pub enum Step<T> {
    /// Fulfill with a value.
    Value(T),
    /// Reject with an error.
    Error(PromiseError),
    /// Settle with whatever this promise eventually settles with.
    Adopt(Promise<T>),
}

impl<T: Value> Step<T> {
    pub(crate) fn settle(self, resolver: Resolver<T>, context: ExecutionContext) {
        match self {
            Self::Value(value) => {
                resolver.fulfill(value);
            }
            Self::Error(error) => {
                resolver.reject(error);
            }
            Self::Adopt(promise) => {
                tracing::trace!(adopted = %promise.id(), "derived promise adopting returned promise");
                promise.subscribe(context, move |outcome| {
                    resolver.resolve(outcome);
                });
            }
        }
    }
}

impl<T> From<Outcome<T>> for Step<T> {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Fulfilled(value) => Self::Value(value),
            Outcome::Rejected(error) => Self::Error(error),
        }
    }
}

impl<T> From<Result<T, PromiseError>> for Step<T> {
    fn from(result: Result<T, PromiseError>) -> Self {
        Outcome::from(result).into()
    }
}

impl<T> From<Promise<T>> for Step<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Adopt(promise)
    }
}

/// Registration methods bound to an explicit execution context, created by
/// [`Promise::on`].
///
/// ```
/// use corepromise::{hang, Promise, ThreadPool};
/// use std::sync::Arc;
///
/// let io = Arc::new(ThreadPool::serial("io").unwrap());
/// let len = Promise::fulfilled("四个字符".to_owned()).on(io).then(|s| s.chars().count());
/// assert_eq!(hang(&len), Ok(4));
/// ```
pub struct On<'a, T> {
    promise: &'a Promise<T>,
    context: ExecutionContext,
}

impl<T: Value> On<'_, T> {
    /// Maps a fulfilled value. Rejections pass through without calling `f`.
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => Step::Value(f(value)),
            Outcome::Rejected(error) => Step::Error(error),
        })
    }

    /// Like [`then`](Self::then), but `f` may reject the derived promise.
    pub fn then_try<U, F>(self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Result<U, PromiseError> + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => f(value).into(),
            Outcome::Rejected(error) => Step::Error(error),
        })
    }

    /// Like [`then`](Self::then), but the derived promise adopts the outcome
    /// of the promise `f` returns.
    pub fn then_promise<U, F>(self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => Step::Adopt(f(value)),
            Outcome::Rejected(error) => Step::Error(error),
        })
    }

    /// Recovers from a rejection with a replacement value. Fulfillments pass
    /// through without calling `f`.
    pub fn catch_error<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> T + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => Step::Value(value),
            Outcome::Rejected(error) => Step::Value(f(error)),
        })
    }

    /// Like [`catch_error`](Self::catch_error), but `f` may keep the chain
    /// rejected by returning an error.
    pub fn catch_try<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> Result<T, PromiseError> + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => Step::Value(value),
            Outcome::Rejected(error) => f(error).into(),
        })
    }

    pub fn catch_promise<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> Promise<T> + Send + 'static,
    {
        self.promise.observe(self.context, move |outcome| match outcome {
            Outcome::Fulfilled(value) => Step::Value(value),
            Outcome::Rejected(error) => Step::Adopt(f(error)),
        })
    }

    /// Runs `f` whatever the outcome. The derived promise settles with the
    /// upstream outcome, unless `f` panics.
    ///
    /// The derived promise only passes the upstream outcome along, so it is
    /// never reported as an unhandled rejection when dropped unobserved.
    /// Handle the error on the upstream promise instead.
    pub fn finally<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let derived = self.promise.observe(self.context, move |outcome| {
            f(&outcome);
            Step::from(outcome)
        });
        derived.mark_consumed();
        derived
    }
}

/// Registration on the [`background`] context.
impl<T: Value> Promise<T> {
    /// Targets the registration methods at `context` instead of the
    /// background pool.
    pub fn on(&self, context: ExecutionContext) -> On<'_, T> {
        On {
            promise: self,
            context,
        }
    }

    /// Runs `f` on the background pool with the fulfilled value.
    ///
    /// Continuations on the background pool start in registration order but
    /// may overlap; use [`on`](Self::on) with a [`ThreadPool::serial`]
    /// context when their order matters.
    ///
    /// [`ThreadPool::serial`]: crate::ThreadPool::serial
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.on(background()).then(f)
    }

    pub fn then_try<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Result<U, PromiseError> + Send + 'static,
    {
        self.on(background()).then_try(f)
    }

    pub fn then_promise<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.on(background()).then_promise(f)
    }

    pub fn catch_error<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> T + Send + 'static,
    {
        self.on(background()).catch_error(f)
    }

    pub fn catch_try<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> Result<T, PromiseError> + Send + 'static,
    {
        self.on(background()).catch_try(f)
    }

    pub fn catch_promise<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(PromiseError) -> Promise<T> + Send + 'static,
    {
        self.on(background()).catch_promise(f)
    }

    pub fn finally<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.on(background()).finally(f)
    }
}
