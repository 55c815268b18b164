use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Number of consecutive slots probed from a stripe hint before giving up on the hint.
pub(crate) const NEIGHBORHOOD: usize = 8;

static NEXT_THREAD_ORDINAL: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Stable per-thread identity used to pick a stripe. Threads get consecutive ordinals,
    // so neighboring threads land on different stripes.
    static THREAD_ORDINAL: usize = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
}

/// Spreads acquisition attempts across the slot space with one cursor per stripe.
///
/// Each cursor lives on its own cache line so threads on different stripes never contend on
/// the same memory. The cursors are hints - they carry no correctness meaning and may point at
/// busy slots.
#[derive(Debug)]
pub(crate) struct StripedTailCounter {
    cursors: Box<[CachePadded<AtomicUsize>]>,
}

impl StripedTailCounter {
    pub(crate) fn new(stripes: NonZero<usize>) -> Self {
        let stripe_count = stripes.get();

        Self {
            // Start the stripes spread apart. Multiplying by a large odd constant scatters the
            // initial positions without caring about the eventual capacity.
            cursors: (0..stripe_count)
                .map(|stripe| CachePadded::new(AtomicUsize::new(stripe.wrapping_mul(0x9E37_79B9))))
                .collect(),
        }
    }

    /// The stripe assigned to the calling thread.
    pub(crate) fn current_stripe(&self) -> usize {
        THREAD_ORDINAL.with(|ordinal| ordinal % self.cursors.len())
    }

    /// Advances the cursor of `stripe` and returns where to start probing, below `capacity`.
    pub(crate) fn next_hint(&self, stripe: usize, capacity: NonZero<usize>) -> usize {
        let cursor = self
            .cursors
            .get(stripe)
            .expect("stripe index out of bounds");

        cursor.fetch_add(NEIGHBORHOOD, Ordering::Relaxed) % capacity
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(StripedTailCounter: Send, Sync);

    #[test]
    fn hints_stay_below_capacity() {
        let counter = StripedTailCounter::new(NonZero::new(4).unwrap());
        let capacity = NonZero::new(13).unwrap();

        for stripe in 0..4 {
            for _ in 0..100 {
                assert!(counter.next_hint(stripe, capacity) < 13);
            }
        }
    }

    #[test]
    fn hints_advance_by_neighborhood() {
        let counter = StripedTailCounter::new(NonZero::new(1).unwrap());
        let capacity = NonZero::new(1000).unwrap();

        let first = counter.next_hint(0, capacity);
        let second = counter.next_hint(0, capacity);

        assert_eq!((first + NEIGHBORHOOD) % 1000, second);
    }

    #[test]
    fn current_stripe_is_stable_per_thread() {
        let counter = StripedTailCounter::new(NonZero::new(3).unwrap());

        let stripe = counter.current_stripe();
        assert!(stripe < 3);
        assert_eq!(stripe, counter.current_stripe());
    }

    #[test]
    #[should_panic]
    fn hint_for_unknown_stripe_panics() {
        let counter = StripedTailCounter::new(NonZero::new(2).unwrap());
        counter.next_hint(2, NonZero::new(10).unwrap());
    }
}
