// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

// `CancelHandle` signals cooperative cancellation to a running execution.
// Backends check it at their suspension points: before each retry attempt,
// while waiting for the engine, and during backoff sleeps.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle{
            inner: Arc::new(Inner{
                cancelled: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        // A poisoned mutex here means a holder panicked between the check and
        // the wait; cancellation is best reported regardless.
        let mut cancelled =
            match self.inner.cancelled.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        match self.inner.cancelled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    // `sleep` blocks for `timeout`, returning early with `true` if the handle
    // is cancelled before the timeout elapses.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let guard =
            match self.inner.cancelled.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

        let (guard, _) = self.inner.signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        *guard
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    // Given a fresh cancellation handle
    // When it's checked without being cancelled
    // Then it reports not-cancelled
    fn new_handle_is_not_cancelled() {
        let handle = CancelHandle::new();

        assert!(!handle.is_cancelled());
    }

    #[test]
    // Given a cancellation handle cancelled by another thread
    // When a long sleep is in progress on the handle
    // Then the sleep returns early and reports the cancellation
    fn cancel_interrupts_sleep() {
        let handle = CancelHandle::new();
        let remote = handle.clone();

        let start = Instant::now();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let cancelled = handle.sleep(Duration::from_secs(60));

        canceller.join()
            .expect("couldn't join the cancelling thread");
        assert!(cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    // Given a cancellation handle that is never cancelled
    // When a short sleep elapses on the handle
    // Then the sleep reports no cancellation
    fn sleep_without_cancel_times_out() {
        let handle = CancelHandle::new();

        let cancelled = handle.sleep(Duration::from_millis(10));

        assert!(!cancelled);
    }
}
