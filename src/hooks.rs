//! Process-wide observer for rejections nobody consumed.
use once_cell::sync::OnceCell;

use crate::{fault, PromiseError};

type UnhandledRejectionHandler = Box<dyn Fn(&PromiseError) + Send + Sync>;

static UNHANDLED_REJECTION: OnceCell<UnhandledRejectionHandler> = OnceCell::new();

/// Installs the handler called when a rejected promise is dropped without any
/// continuation, future poll, chain or combinator having consumed it.
///
/// The handler can be set once per process; returns `false` if one was
/// already installed. It runs on whichever thread drops the last handle to
/// the promise.
pub fn set_unhandled_rejection_handler<F>(handler: F) -> bool
where
    F: Fn(&PromiseError) + Send + Sync + 'static,
{
    UNHANDLED_REJECTION.set(Box::new(handler)).is_ok()
}

pub(crate) fn report_unhandled(error: &PromiseError) {
    if let Some(handler) = UNHANDLED_REJECTION.get() {
        if let Err(panic) = fault::capture(|| handler(error)) {
            tracing::error!(%panic, "unhandled rejection handler panicked");
        }
    }
}
