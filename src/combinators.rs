//! Aggregating many promises into one.
//!
//! The aggregate is an ordinary pending promise settled by observers on the
//! inputs. Only the first settlement of the aggregate takes effect, so inputs
//! that finish after a fail-fast rejection are observed and discarded.
use std::sync::{Arc, Mutex, PoisonError};

use crate::executor::background;
use crate::{Outcome, Promise, PromiseError, Value};

struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value, in input order, once all inputs fulfill.
/// Rejects as soon as any input rejects, with that input's error plus its
/// [`failing_index`](PromiseError::failing_index).
///
/// ```
/// use corepromise::{all, hang, Promise, PromiseError};
///
/// let ok = all([Promise::fulfilled(1), Promise::fulfilled(2)]);
/// assert_eq!(hang(&ok), Ok(vec![1, 2]));
///
/// let (_never, pending) = Promise::<i32>::pending();
/// let failed = all([pending, Promise::rejected(PromiseError::msg("boom"))]);
/// assert_eq!(hang(&failed).unwrap_err().failing_index(), Some(1));
/// ```
pub fn all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::fulfilled(Vec::new());
    }
    let (resolver, aggregate) = Promise::<Vec<T>>::pending();
    let slots = Arc::new(Mutex::new(Slots::<T> {
        values: (0..promises.len()).map(|_| None).collect(),
        remaining: promises.len(),
    }));
    tracing::trace!(aggregate = %aggregate.id(), inputs = promises.len(), "all");
    for (index, promise) in promises.iter().enumerate() {
        let resolver = resolver.clone();
        let slots = slots.clone();
        promise.subscribe(background(), move |outcome| match outcome {
            Outcome::Fulfilled(value) => {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                slots.values[index] = Some(value);
                slots.remaining -= 1;
                if slots.remaining == 0 {
                    let values: Vec<T> = slots.values.drain(..).flatten().collect();
                    drop(slots);
                    resolver.fulfill(values);
                }
            }
            Outcome::Rejected(error) => {
                resolver.reject(error.with_failing_index(index));
            }
        });
    }
    aggregate
}

/// Same as [`all`].
pub fn when<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Promise<T>>,
{
    all(promises)
}

/// Waits for every input to settle. Fulfills with the values in input order
/// if all of them fulfilled; otherwise rejects with an
/// [`ErrorKind::AggregateFailure`](crate::ErrorKind) error whose
/// [`join_outcomes`](PromiseError::join_outcomes) hold every input's outcome.
pub fn join<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::fulfilled(Vec::new());
    }
    let (resolver, aggregate) = Promise::<Vec<T>>::pending();
    let slots = Arc::new(Mutex::new(Slots::<Outcome<T>> {
        values: (0..promises.len()).map(|_| None).collect(),
        remaining: promises.len(),
    }));
    tracing::trace!(aggregate = %aggregate.id(), inputs = promises.len(), "join");
    for (index, promise) in promises.iter().enumerate() {
        let resolver = resolver.clone();
        let slots = slots.clone();
        promise.subscribe(background(), move |outcome| {
            let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values[index] = Some(outcome);
            slots.remaining -= 1;
            if slots.remaining > 0 {
                return;
            }
            let outcomes: Vec<Outcome<T>> = slots.values.drain(..).flatten().collect();
            drop(slots);
            resolver.resolve(combine(outcomes));
        });
    }
    aggregate
}

fn combine<T: Value>(outcomes: Vec<Outcome<T>>) -> Outcome<Vec<T>> {
    if outcomes.iter().any(Outcome::is_rejected) {
        return Outcome::Rejected(PromiseError::aggregate(outcomes));
    }
    outcomes
        .into_iter()
        .map(Outcome::into_result)
        .collect::<Result<Vec<_>, _>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hang, ErrorKind};
    use futures::executor::block_on;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_all_preserves_input_order() {
        let (slow, slow_promise) = Promise::pending();
        let (fast, fast_promise) = Promise::pending();
        let aggregate = all(vec![slow_promise, fast_promise]);
        fast.fulfill("fast");
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            slow.fulfill("slow");
        });
        assert_eq!(block_on(aggregate), Ok(vec!["slow", "fast"]));
    }

    #[test]
    fn test_all_fails_fast() {
        let (_p1, pending1) = Promise::<i32>::pending();
        let (p2, pending2) = Promise::<i32>::pending();
        let (_p3, pending3) = Promise::<i32>::pending();
        let aggregate = all([pending1, pending2, pending3]);
        p2.reject(PromiseError::new("app", 7, "E"));
        let error = hang(&aggregate).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UserDefined);
        assert_eq!(error.code(), 7);
        assert_eq!(error.failing_index(), Some(1));
    }

    #[test]
    fn test_all_ignores_later_rejections() {
        let (p1, pending1) = Promise::<i32>::pending();
        let (p2, pending2) = Promise::<i32>::pending();
        let aggregate = all([pending1, pending2]);
        p2.reject(PromiseError::msg("first"));
        let error = hang(&aggregate).unwrap_err();
        p1.reject(PromiseError::msg("second"));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(aggregate.error(), Some(error));
        assert_eq!(aggregate.error().unwrap().failing_index(), Some(1));
    }

    #[test]
    fn test_when_is_all() {
        let aggregate = when([Promise::fulfilled('a'), Promise::fulfilled('b')]);
        assert_eq!(hang(&aggregate), Ok(vec!['a', 'b']));
    }

    #[test]
    fn test_empty_combinators_fulfill_immediately() {
        let all_empty = all(Vec::<Promise<u8>>::new());
        let join_empty = join(Vec::<Promise<u8>>::new());
        assert_eq!(all_empty.value(), Some(vec![]));
        assert_eq!(join_empty.value(), Some(vec![]));
    }

    #[test]
    fn test_join_fulfills_when_nothing_rejects() {
        let aggregate = join([Promise::fulfilled(1), Promise::fulfilled(2), Promise::fulfilled(3)]);
        assert_eq!(hang(&aggregate), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn test_join_waits_for_every_input() {
        let (p1, pending1) = Promise::<i32>::pending();
        let e2 = PromiseError::msg("E2");
        let aggregate = join([pending1, Promise::rejected(e2.clone())]);
        thread::sleep(Duration::from_millis(20));
        assert!(aggregate.is_pending());
        p1.fulfill(1);
        let error = hang(&aggregate).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::AggregateFailure);
        assert_eq!(
            error.join_outcomes::<i32>(),
            Some([Outcome::Fulfilled(1), Outcome::Rejected(e2)].as_slice())
        );
    }
}
