//! The promise state machine.
//!
//! A promise is a shared cell that moves from pending to settled exactly once.
//! While pending it queues continuations; the transition detaches the queue
//! under the lock and hands every continuation to its execution context after
//! the lock is released, in registration order.
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::chain::Step;
use crate::executor::ExecutionContext;
use crate::{fault, hooks, Outcome, PromiseError, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a promise.
///
/// Chains refer to their parent and root through ids only, so a derived
/// promise never keeps its upstream alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise#{}", self.0)
    }
}

type Deliver<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

struct Continuation<T> {
    context: ExecutionContext,
    deliver: Deliver<T>,
}

impl<T: Value> Continuation<T> {
    fn schedule(self, outcome: Outcome<T>) {
        let Self { context, deliver } = self;
        context.execute(Box::new(move || deliver(outcome)));
    }
}

enum State<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Outcome<T>),
}

impl<T> State<T> {
    fn pending() -> Self {
        Self::Pending {
            continuations: Vec::new(),
            wakers: Vec::new(),
        }
    }
}

struct Shared<T> {
    id: PromiseId,
    parent: Option<PromiseId>,
    root: Option<PromiseId>,
    name: Mutex<Option<String>>,
    /// Set once anything has subscribed to or polled this promise.
    consumed: AtomicBool,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn new(parent: Option<PromiseId>, root: Option<PromiseId>, state: State<T>) -> Arc<Self> {
        Arc::new(Self {
            id: PromiseId::next(),
            parent,
            root,
            name: Mutex::new(None),
            consumed: AtomicBool::new(false),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn root_id(&self) -> PromiseId {
        self.root.unwrap_or(self.id)
    }
}

impl<T: Value> Shared<T> {
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut state = self.lock();
        let State::Pending { continuations, wakers } = &mut *state else {
            tracing::debug!(promise = %self.id, "ignoring resolution of an already settled promise");
            return false;
        };
        let continuations = mem::take(continuations);
        let wakers = mem::take(wakers);
        *state = State::Settled(outcome.clone());
        drop(state);

        tracing::trace!(
            promise = %self.id,
            rejected = outcome.is_rejected(),
            continuations = continuations.len(),
            "settled promise"
        );
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation.schedule(outcome.clone());
        }
        true
    }

    fn subscribe(&self, context: ExecutionContext, deliver: Deliver<T>) {
        self.consumed.store(true, Ordering::Relaxed);
        let continuation = Continuation { context, deliver };
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { continuations, .. } => {
                    continuations.push(continuation);
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        continuation.schedule(outcome);
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if *self.consumed.get_mut() {
            return;
        }
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let State::Settled(Outcome::Rejected(error)) = state {
            hooks::report_unhandled(error);
        }
    }
}

/// A handle to a value that becomes available later.
///
/// Handles are cheap to clone; every clone observes the same state. Register
/// continuations with [`then`](Self::then), [`catch_error`](Self::catch_error)
/// and [`finally`](Self::finally), or `.await` the promise directly.
///
/// ```
/// use corepromise::{hang, Promise};
/// use std::thread;
///
/// let (resolver, promise) = Promise::<String>::pending();
/// let greeting = promise.then(|name| format!("hello {name}"));
/// thread::spawn(move || resolver.fulfill("🍓".into()));
/// assert_eq!(hang(&greeting).unwrap(), "hello 🍓");
/// ```
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.lock() {
            State::Pending { .. } => "pending",
            State::Settled(Outcome::Fulfilled(_)) => "fulfilled",
            State::Settled(Outcome::Rejected(_)) => "rejected",
        };
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("name", &self.name())
            .field("state", &state)
            .finish()
    }
}

impl<T> Promise<T> {
    pub fn id(&self) -> PromiseId {
        self.shared.id
    }

    /// The promise this one was derived from, if any.
    pub fn parent_id(&self) -> Option<PromiseId> {
        self.shared.parent
    }

    /// The promise that started this chain; a root promise is its own root.
    pub fn root_id(&self) -> PromiseId {
        self.shared.root_id()
    }

    pub fn name(&self) -> Option<String> {
        self.shared.name.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sets the debugging label. Has no effect on behaviour.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.shared.name.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.into());
    }

    #[must_use]
    pub fn named(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.lock(), State::Pending { .. })
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.shared.lock(), State::Settled(Outcome::Fulfilled(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.shared.lock(), State::Settled(Outcome::Rejected(_)))
    }
}

impl<T: Value> Promise<T> {
    /// Creates a pending promise and the resolver that settles it.
    pub fn pending() -> (Resolver<T>, Self) {
        Self::pending_with(None, None)
    }

    pub(crate) fn pending_with(parent: Option<PromiseId>, root: Option<PromiseId>) -> (Resolver<T>, Self) {
        let shared = Shared::new(parent, root, State::pending());
        let resolver = Resolver {
            handle: Arc::new(ResolverHandle {
                shared: shared.clone(),
            }),
        };
        (resolver, Self { shared })
    }

    pub fn settled(outcome: Outcome<T>) -> Self {
        Self {
            shared: Shared::new(None, None, State::Settled(outcome)),
        }
    }

    pub fn fulfilled(value: T) -> Self {
        Self::settled(Outcome::Fulfilled(value))
    }

    pub fn rejected(error: PromiseError) -> Self {
        Self::settled(Outcome::Rejected(error))
    }

    pub fn from_result(result: Result<T, PromiseError>) -> Self {
        Self::settled(result.into())
    }

    /// Runs `f` right away with the resolver of a new pending promise.
    ///
    /// If `f` panics before settling the promise, it is rejected with an
    /// [`ErrorKind::ExceptionCaught`](crate::ErrorKind) error.
    ///
    /// ```
    /// use corepromise::{hang, Promise};
    ///
    /// let promise = Promise::<i32>::with_resolver(|resolver| {
    ///     resolver.fulfill(7);
    /// });
    /// assert_eq!(hang(&promise), Ok(7));
    /// ```
    pub fn with_resolver<F>(f: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let (resolver, promise) = Self::pending();
        let fallback = resolver.clone();
        if let Err(error) = fault::capture(move || f(resolver)) {
            fallback.reject(error);
        }
        promise
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        match &*self.shared.lock() {
            State::Pending { .. } => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// The fulfilled value, or `None` while pending or when rejected.
    pub fn value(&self) -> Option<T> {
        self.outcome().and_then(|outcome| outcome.into_result().ok())
    }

    pub fn error(&self) -> Option<PromiseError> {
        self.outcome().and_then(|outcome| outcome.into_result().err())
    }

    /// Registers `reaction` to run on `context` with this promise's outcome,
    /// returning a promise settled by what the reaction hands back.
    ///
    /// This is the primitive behind [`then`](Self::then),
    /// [`catch_error`](Self::catch_error) and [`finally`](Self::finally). The
    /// reaction always runs asynchronously, even when this promise is already
    /// settled. A panic inside it rejects the derived promise with an
    /// [`ErrorKind::ExceptionCaught`](crate::ErrorKind) error.
    pub fn observe<U, F>(&self, context: ExecutionContext, reaction: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>) -> Step<U> + Send + 'static,
    {
        let (resolver, derived) = Promise::<U>::pending_with(Some(self.id()), Some(self.root_id()));
        tracing::trace!(promise = %self.id(), derived = %derived.id(), "registered continuation");
        let adopt_context = context.clone();
        self.subscribe(context, move |outcome| {
            let step = fault::capture(move || reaction(outcome)).unwrap_or_else(Step::Error);
            step.settle(resolver, adopt_context);
        });
        derived
    }

    /// Stops this promise from being reported as an unhandled rejection.
    pub(crate) fn mark_consumed(&self) {
        self.shared.consumed.store(true, Ordering::Relaxed);
    }

    /// Delivers the outcome to `deliver` on `context` without deriving a promise.
    pub(crate) fn subscribe<F>(&self, context: ExecutionContext, deliver: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.shared.subscribe(context, Box::new(deliver));
    }
}

impl<T: Value> Future for Promise<T> {
    type Output = Result<T, PromiseError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.consumed.store(true, Ordering::Relaxed);
        let mut state = self.shared.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone().into_result()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The producer side of a pending promise.
///
/// Any clone may settle the promise, from any thread; only the first
/// settlement takes effect. Dropping every clone while the promise is still
/// pending leaves it pending forever and logs a warning.
pub struct Resolver<T> {
    handle: Arc<ResolverHandle<T>>,
}

struct ResolverHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for ResolverHandle<T> {
    fn drop(&mut self) {
        let abandoned = matches!(*self.shared.lock(), State::Pending { .. });
        if abandoned {
            tracing::warn!(promise = %self.shared.id, "resolver dropped while its promise is still pending");
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("promise", &self.handle.shared.id).finish()
    }
}

impl<T: Value> Resolver<T> {
    /// Settles the promise. Returns `false`, and changes nothing, if it was
    /// already settled.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        self.handle.shared.settle(outcome)
    }

    pub fn fulfill(&self, value: T) -> bool {
        self.resolve(Outcome::Fulfilled(value))
    }

    pub fn reject(&self, error: PromiseError) -> bool {
        self.resolve(Outcome::Rejected(error))
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*self.handle.shared.lock(), State::Pending { .. })
    }

    /// A consumer handle to the promise this resolver settles.
    pub fn promise(&self) -> Promise<T> {
        Promise {
            shared: self.handle.shared.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, RunLoop};
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_resolve_across_threads() {
        let (op, op_a) = Promise::<String>::pending();
        let task1 = thread::spawn(move || block_on(op_a));
        let task2 = thread::spawn(move || op.fulfill(String::from("🍓")));
        assert!(task2.join().expect("The task2 thread has panicked"));
        assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok("🍓".into()));
    }

    #[test]
    fn test_two_consumers_see_one_outcome() {
        let (op, op_a) = Promise::<String>::pending();
        let op_b = op_a.clone();
        let task1 = thread::spawn(move || block_on(op_a));
        let task2 = thread::spawn(move || block_on(op_b));
        op.reject(PromiseError::msg("reject!!"));
        let first = task1.join().expect("The task1 thread has panicked").unwrap_err();
        let second = task2.join().expect("The task2 thread has panicked").unwrap_err();
        assert_eq!(first, second);
        assert_eq!(first.message(), "reject!!");
    }

    #[test]
    fn test_resolve_twice_keeps_first_outcome() {
        let (resolver, promise) = Promise::pending();
        let other = resolver.clone();
        assert!(resolver.fulfill(1));
        assert!(!other.fulfill(2));
        assert!(!other.reject(PromiseError::msg("late")));
        assert_eq!(promise.outcome(), Some(Outcome::Fulfilled(1)));
    }

    #[test]
    fn test_concurrent_resolution_settles_once() {
        let (resolver, promise) = Promise::<usize>::pending();
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                let winners = winners.clone();
                thread::spawn(move || {
                    if resolver.fulfill(i) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("The resolving thread has panicked");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(promise.is_fulfilled());
    }

    #[test]
    fn test_inspection_distinguishes_unit_from_pending() {
        let (resolver, promise) = Promise::<()>::pending();
        assert!(promise.is_pending());
        assert_eq!(promise.value(), None);
        resolver.fulfill(());
        assert!(promise.is_settled());
        assert!(promise.is_fulfilled());
        assert!(!promise.is_rejected());
        assert_eq!(promise.value(), Some(()));
        assert_eq!(promise.error(), None);
    }

    #[test]
    fn test_observe_on_settled_promise_is_deferred() {
        let run_loop = RunLoop::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let derived = Promise::fulfilled(1).observe(run_loop.clone(), move |outcome| {
            flag.store(true, Ordering::SeqCst);
            Step::from(outcome)
        });
        assert!(!ran.load(Ordering::SeqCst));
        assert!(derived.is_pending());
        assert_eq!(run_loop.run_pending(), 1);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(derived.value(), Some(1));
    }

    #[test]
    fn test_observe_reaction_panic_becomes_exception() {
        let run_loop = RunLoop::new();
        let derived: Promise<i32> =
            Promise::fulfilled(1).observe(run_loop.clone(), |_| -> Step<i32> { panic!("kaboom") });
        run_loop.run_pending();
        let error = derived.error().unwrap();
        assert_eq!(error.kind(), ErrorKind::ExceptionCaught);
        assert_eq!(error.exception_description(), Some("kaboom"));
    }

    #[test]
    fn test_derived_chain_identity() {
        let (_resolver, root) = Promise::<i32>::pending();
        let run_loop = RunLoop::new();
        let child: Promise<i32> = root.observe(run_loop.clone(), Step::from);
        let grandchild: Promise<i32> = child.observe(run_loop.clone(), Step::from);
        assert_eq!(root.parent_id(), None);
        assert_eq!(root.root_id(), root.id());
        assert_eq!(child.parent_id(), Some(root.id()));
        assert_eq!(child.root_id(), root.id());
        assert_eq!(grandchild.parent_id(), Some(child.id()));
        assert_eq!(grandchild.root_id(), root.root_id());
    }

    #[test]
    fn test_with_resolver_captures_panic() {
        let promise = Promise::<i32>::with_resolver(|_resolver| panic!("producer failed"));
        let error = promise.error().unwrap();
        assert_eq!(error.kind(), ErrorKind::ExceptionCaught);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured_logs(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_abandoned_resolver_warns() {
        let logs = captured_logs(|| {
            let (resolver, promise) = Promise::<u8>::pending();
            let spare = resolver.clone();
            drop(resolver);
            drop(spare);
            assert!(promise.is_pending());
        });
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("resolver dropped while its promise is still pending"), "{logs}");
    }

    #[test]
    fn test_resolver_dropped_after_settling_is_quiet() {
        let logs = captured_logs(|| {
            let (resolver, promise) = Promise::<u8>::pending();
            resolver.fulfill(1);
            drop(resolver);
            assert_eq!(promise.value(), Some(1));
        });
        assert!(!logs.contains("resolver dropped"), "{logs}");
    }

    #[test]
    fn test_names_are_debug_only() {
        let promise = Promise::fulfilled(3).named("answer");
        assert_eq!(promise.name().as_deref(), Some("answer"));
        assert!(format!("{promise:?}").contains("fulfilled"));
        assert_eq!(promise.value(), Some(3));
    }
}
