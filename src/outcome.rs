use crate::PromiseError;

/// The settled result of a promise.
///
/// A pending promise has no outcome at all, so a promise fulfilled with `()`
/// or `None` is never mistaken for one that is still pending.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(PromiseError),
}

impl<T> Outcome<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PromiseError> {
        match self {
            Self::Fulfilled(_) => None,
            Self::Rejected(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, PromiseError> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(error) => Err(error),
        }
    }
}

impl<T> From<Result<T, PromiseError>> for Outcome<T> {
    fn from(result: Result<T, PromiseError>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

impl<T> From<Outcome<T>> for Result<T, PromiseError> {
    fn from(outcome: Outcome<T>) -> Self {
        outcome.into_result()
    }
}
