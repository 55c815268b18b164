#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the bitmask pool workspace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// This function wraps a test closure with a timeout mechanism. If the test
/// takes longer than the timeout to complete, the process will be terminated
/// to prevent CI/build systems from hanging.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under
/// Miri, where thread synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog
/// is disabled and the test function is executed directly. This allows mutation
/// testing to properly detect hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode).
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     // Your test code here
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    // Check if we are running under mutation testing.
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        // Under mutation testing, disable the watchdog to allow hanging mutations.
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    // Run the test in a separate thread
    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // Send the result back - if this fails, the receiver has timed out
        drop(tx.send(result));
    });

    // Miri is dramatically slower for thread synchronization, so we use a
    // longer timeout to avoid false positives while still catching real hangs.
    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    // Wait for either the test to complete or timeout.
    match rx.recv_timeout(timeout) {
        Ok(result) => {
            // Test completed successfully, join the thread to clean up
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            // Test timed out - this indicates the test is hanging
            panic!("Test exceeded 10-second timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // Thread panicked, join it to get the panic
            match test_handle.join() {
                Ok(()) => panic!("Test thread disconnected unexpectedly"),
                Err(e) => std::panic::resume_unwind(e),
            }
        }
    }
}

/// Independent record of which slot indexes a test believes are checked out.
///
/// Tests of concurrent pools claim an index in the shadow right after acquiring the slot and
/// release it right before returning the slot. If two holders ever own the same index at the
/// same time, the shadow panics, pinpointing a mutual exclusion failure in the pool.
///
/// The shadow uses one atomic flag per index, so it adds no synchronization of its own that
/// could hide a race in the code under test.
///
/// # Example
///
/// ```rust
/// use testing::OwnershipShadow;
///
/// let shadow = OwnershipShadow::new(4);
///
/// shadow.claim(2);
/// shadow.release(2);
/// shadow.claim(2);
/// ```
#[derive(Debug)]
pub struct OwnershipShadow {
    owned: Box<[AtomicBool]>,
}

impl OwnershipShadow {
    /// Creates a shadow that can track indexes below `len`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            owned: (0..len).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Records that the caller now owns `index`.
    ///
    /// # Panics
    ///
    /// Panics if somebody else already owns `index` or if it is out of bounds.
    pub fn claim(&self, index: usize) {
        let was_owned = self.flag(index).swap(true, Ordering::AcqRel);

        assert!(!was_owned, "slot {index} handed out to two holders at once");
    }

    /// Records that the caller no longer owns `index`.
    ///
    /// # Panics
    ///
    /// Panics if nobody owns `index` or if it is out of bounds.
    pub fn release(&self, index: usize) {
        let was_owned = self.flag(index).swap(false, Ordering::AcqRel);

        assert!(was_owned, "slot {index} released without being owned");
    }

    /// Number of indexes currently owned.
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.owned
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    fn flag(&self, index: usize) -> &AtomicBool {
        self.owned
            .get(index)
            .unwrap_or_else(|| panic!("slot {index} is beyond the tracked range"))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_allows_fast_tests() {
        let result = with_watchdog(|| {
            // A test that completes quickly
            42
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn watchdog_returns_correct_value() {
        let result = with_watchdog(|| "hello world");
        assert_eq!(result, "hello world");
    }

    #[test]
    fn shadow_tracks_ownership() {
        let shadow = OwnershipShadow::new(3);

        shadow.claim(0);
        shadow.claim(2);
        assert_eq!(shadow.owned_count(), 2);

        shadow.release(0);
        assert_eq!(shadow.owned_count(), 1);
    }

    #[test]
    #[should_panic]
    fn shadow_detects_double_claim() {
        let shadow = OwnershipShadow::new(1);

        shadow.claim(0);
        shadow.claim(0);
    }

    #[test]
    #[should_panic]
    fn shadow_detects_release_without_claim() {
        OwnershipShadow::new(1).release(0);
    }
}
