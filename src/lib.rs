//! Thread-safe promises with chaining, recovery and combinators.
//!
//! A [`Promise`] is settled exactly once, from any thread, through its
//! [`Resolver`]. Consumers register continuations with [`Promise::then`],
//! [`Promise::catch_error`] and [`Promise::finally`]; each returns a derived
//! promise settled by the handler's result. Handlers run asynchronously on an
//! execution context, the [`background`] pool unless another is named with
//! [`Promise::on`]. A panicking handler rejects its derived promise instead of
//! unwinding into the scheduler.
//!
//! # Examples
//!
//! ```
//! use corepromise::{all, hang, Promise, PromiseError};
//! use std::thread;
//!
//! let (resolver, promise) = Promise::<u32>::pending();
//! let checked = promise
//!     .then_try(|n| if n > 100 { Err(PromiseError::msg("too big")) } else { Ok(n) })
//!     .catch_error(|_| 100)
//!     .then(|n| n + 1);
//!
//! thread::spawn(move || resolver.fulfill(512));
//!
//! let both = all([checked, Promise::fulfilled(7)]);
//! assert_eq!(hang(&both), Ok(vec![101, 7]));
//! ```
mod chain;
mod combinators;
mod error;
mod executor;
mod fault;
mod hooks;
mod outcome;
mod producers;
mod promise;
mod run_loop;
mod timer;

pub use chain::{On, Step};
pub use combinators::{all, join, when};
pub use error::{
    Attachment, ErrorKind, PromiseError, EXCEPTION_KEY, FAILING_INDEX_KEY, JOIN_OUTCOMES_KEY,
    PROMISE_ERROR_DOMAIN,
};
pub use executor::{background, ExecutionContext, Executor, Job, PoolConfig, ThreadPool};
pub use fault::from_panic;
pub use hooks::set_unhandled_rejection_handler;
pub use outcome::Outcome;
pub use producers::{after, dispatch, dispatch_on, hang};
pub use promise::{Promise, PromiseId, Resolver};
pub use run_loop::RunLoop;

/// Payloads a promise can carry.
///
/// Outcomes are cloned for every continuation; wrap large payloads in an
/// [`Arc`](std::sync::Arc).
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}
