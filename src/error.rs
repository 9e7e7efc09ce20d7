//! Structured rejection errors.
//!
//! Every rejected promise carries a [`PromiseError`]. The taxonomy is closed:
//! errors are either produced by a producer or handler ([`ErrorKind::UserDefined`]),
//! by a panicking handler ([`ErrorKind::ExceptionCaught`]), or by [`join`](crate::join)
//! ([`ErrorKind::AggregateFailure`]).
use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::{Outcome, Value};

/// Domain of every error produced by this crate.
pub const PROMISE_ERROR_DOMAIN: &str = "corepromise";

/// Attachment key holding the index of the input that failed an [`all`](crate::all).
pub const FAILING_INDEX_KEY: &str = "failing_index";

/// Attachment key holding the positional outcomes of a failed [`join`](crate::join).
pub const JOIN_OUTCOMES_KEY: &str = "join_outcomes";

/// Attachment key holding the description of a caught panic.
pub const EXCEPTION_KEY: &str = "exception";

/// Which part of the system produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A continuation handler panicked.
    ExceptionCaught,
    /// A `join` saw at least one rejected input.
    AggregateFailure,
    /// Anything a producer or handler rejected with explicitly.
    UserDefined,
}

impl ErrorKind {
    /// Reserved code for [`ErrorKind::ExceptionCaught`].
    pub const EXCEPTION_CODE: i64 = 1;
    /// Reserved code for [`ErrorKind::AggregateFailure`].
    pub const AGGREGATE_CODE: i64 = 2;
}

/// Auxiliary data carried by a [`PromiseError`].
#[derive(Clone)]
pub enum Attachment {
    Index(usize),
    Text(String),
    /// A type-erased `Vec<Outcome<T>>`, read back with
    /// [`PromiseError::join_outcomes`].
    Outcomes(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => f.debug_tuple("Index").field(index).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Outcomes(_) => f.write_str("Outcomes(..)"),
        }
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Index(a), Self::Index(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Outcomes(a), Self::Outcomes(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

/// The error half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{domain} error {code}: {message}")]
pub struct PromiseError {
    kind: ErrorKind,
    domain: Cow<'static, str>,
    code: i64,
    message: String,
    attachments: BTreeMap<Cow<'static, str>, Attachment>,
}

impl PromiseError {
    /// A user defined error in an arbitrary domain.
    pub fn new(domain: impl Into<Cow<'static, str>>, code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::UserDefined,
            domain: domain.into(),
            code,
            message: message.into(),
            attachments: BTreeMap::new(),
        }
    }

    /// A user defined error in the crate's domain with code `0`.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(PROMISE_ERROR_DOMAIN, 0, message)
    }

    pub(crate) fn exception(description: String) -> Self {
        Self {
            kind: ErrorKind::ExceptionCaught,
            domain: Cow::Borrowed(PROMISE_ERROR_DOMAIN),
            code: ErrorKind::EXCEPTION_CODE,
            message: format!("handler panicked: {description}"),
            attachments: BTreeMap::new(),
        }
        .with_attachment(EXCEPTION_KEY, Attachment::Text(description))
    }

    pub(crate) fn aggregate<T: Value>(outcomes: Vec<Outcome<T>>) -> Self {
        let rejected = outcomes.iter().filter(|outcome| outcome.is_rejected()).count();
        Self {
            kind: ErrorKind::AggregateFailure,
            domain: Cow::Borrowed(PROMISE_ERROR_DOMAIN),
            code: ErrorKind::AGGREGATE_CODE,
            message: format!("{rejected} of {} joined promises rejected", outcomes.len()),
            attachments: BTreeMap::new(),
        }
        .with_attachment(JOIN_OUTCOMES_KEY, Attachment::Outcomes(Arc::new(outcomes)))
    }

    /// Returns this error with `attachment` stored under `key`, replacing any
    /// previous value.
    #[must_use]
    pub fn with_attachment(mut self, key: impl Into<Cow<'static, str>>, attachment: Attachment) -> Self {
        self.attachments.insert(key.into(), attachment);
        self
    }

    #[must_use]
    pub(crate) fn with_failing_index(self, index: usize) -> Self {
        self.with_attachment(FAILING_INDEX_KEY, Attachment::Index(index))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attachment(&self, key: &str) -> Option<&Attachment> {
        self.attachments.get(key)
    }

    pub fn attachments(&self) -> impl Iterator<Item = (&str, &Attachment)> {
        self.attachments.iter().map(|(key, value)| (key.as_ref(), value))
    }

    /// Index of the input that failed an [`all`](crate::all) or [`when`](crate::when).
    pub fn failing_index(&self) -> Option<usize> {
        match self.attachment(FAILING_INDEX_KEY) {
            Some(Attachment::Index(index)) => Some(*index),
            _ => None,
        }
    }

    /// Description of the panic behind an [`ErrorKind::ExceptionCaught`] error.
    pub fn exception_description(&self) -> Option<&str> {
        match self.attachment(EXCEPTION_KEY) {
            Some(Attachment::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Positional outcomes of a failed [`join`](crate::join).
    ///
    /// Returns `None` if this is not a join failure or if `T` is not the
    /// payload type of the joined promises.
    pub fn join_outcomes<T: Value>(&self) -> Option<&[Outcome<T>]> {
        match self.attachment(JOIN_OUTCOMES_KEY) {
            Some(Attachment::Outcomes(outcomes)) => (**outcomes)
                .downcast_ref::<Vec<Outcome<T>>>()
                .map(Vec::as_slice),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_defined_error() {
        let error = PromiseError::new("net", 404, "not found");
        assert_eq!(error.kind(), ErrorKind::UserDefined);
        assert_eq!(error.domain(), "net");
        assert_eq!(error.code(), 404);
        assert_eq!(error.to_string(), "net error 404: not found");
        assert_eq!(error.failing_index(), None);
    }

    #[test]
    fn test_exception_error_keeps_description() {
        let error = PromiseError::exception("💥".into());
        assert_eq!(error.kind(), ErrorKind::ExceptionCaught);
        assert_eq!(error.code(), ErrorKind::EXCEPTION_CODE);
        assert_eq!(error.exception_description(), Some("💥"));
    }

    #[test]
    fn test_failing_index_is_attached_without_changing_kind() {
        let error = PromiseError::msg("boom").with_failing_index(3);
        assert_eq!(error.kind(), ErrorKind::UserDefined);
        assert_eq!(error.failing_index(), Some(3));
        assert_eq!(error.message(), "boom");
    }

    #[test]
    fn test_join_outcomes_downcast() {
        let outcomes = vec![Outcome::Fulfilled(1), Outcome::Rejected(PromiseError::msg("e2"))];
        let error = PromiseError::aggregate(outcomes.clone());
        assert_eq!(error.kind(), ErrorKind::AggregateFailure);
        assert_eq!(error.message(), "1 of 2 joined promises rejected");
        assert_eq!(error.join_outcomes::<i32>(), Some(outcomes.as_slice()));
        assert!(error.join_outcomes::<String>().is_none());
    }
}
