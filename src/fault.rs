//! Turns panics raised by handlers into [`ErrorKind::ExceptionCaught`](crate::ErrorKind)
//! rejections. Every handler invocation in the crate goes through [`capture`].
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::PromiseError;

/// Runs `f`, converting a panic into an exception error.
pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> Result<R, PromiseError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(from_panic)
}

/// Wraps a panic payload, as returned by [`std::panic::catch_unwind`], in a
/// [`PromiseError`].
pub fn from_panic(payload: Box<dyn Any + Send>) -> PromiseError {
    PromiseError::exception(describe(payload.as_ref()))
}

pub(crate) fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(error) = payload.downcast_ref::<PromiseError>() {
        error.to_string()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
