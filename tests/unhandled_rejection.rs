#[cfg(test)]
mod tests {
    use corepromise::{hang, set_unhandled_rejection_handler, Promise, PromiseError};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    // The handler is process-wide, so this binary holds a single test.
    #[test]
    fn test_unhandled_rejection_reported_once_dropped() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        assert!(set_unhandled_rejection_handler(move |error: &PromiseError| {
            sink.lock().unwrap().push(error.message().to_owned());
        }));
        assert!(!set_unhandled_rejection_handler(|_| {}));

        drop(Promise::<()>::rejected(PromiseError::msg("ignored")));

        let handled = Promise::<()>::rejected(PromiseError::msg("handled"));
        let recovered = handled.catch_error(|_| ());
        hang(&recovered).unwrap();
        drop(handled);
        drop(recovered);

        drop(Promise::fulfilled(1));

        let upstream = Promise::<()>::rejected(PromiseError::msg("cleaned up"));
        let recovered = upstream.catch_error(|_| ());
        let cleanup = upstream.finally(|_| {});
        hang(&recovered).unwrap();
        while cleanup.is_pending() {
            thread::sleep(Duration::from_millis(1));
        }
        drop(upstream);
        drop(recovered);
        drop(cleanup);
        thread::sleep(Duration::from_millis(20));

        assert_eq!(*reported.lock().unwrap(), vec!["ignored".to_owned()]);
    }
}
