use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const WORD_BITS: usize = u64::BITS as usize;

/// Packed bit-per-slot record of which slots are eligible for acquisition.
///
/// A set bit means the slot is free, a clear bit means it is checked out (or not yet part of
/// the pool). The bitmap is the source of truth for slot ownership - every other structure in
/// the pool is merely a hint that must be validated against it.
///
/// The bitmap is sized for the maximum capacity the pool may ever reach, so it never needs to be
/// reallocated. Bits beyond the active range stay clear until expansion activates them via
/// [`mark_free_range()`][Self::mark_free_range], which makes them indistinguishable from busy
/// slots to every scan.
#[derive(Debug)]
pub(crate) struct AvailabilityBitmap {
    words: Box<[AtomicU64]>,

    // Number of bits that have been made part of the pool. Only grows.
    active: AtomicUsize,
}

impl AvailabilityBitmap {
    /// Creates a bitmap that can track up to `max_len` slots, with none of them active yet.
    pub(crate) fn new(max_len: usize) -> Self {
        let word_count = max_len.div_ceil(WORD_BITS);

        Self {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            active: AtomicUsize::new(0),
        }
    }

    /// Number of slots that are part of the pool, free or not.
    pub(crate) fn active_len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Atomically clears the bit for `index` if it is set.
    ///
    /// Returns `true` if this caller performed the 1 -> 0 transition and thereby won ownership
    /// of the slot. Any number of concurrent callers may race on the same bit but at most one
    /// of them observes `true`.
    pub(crate) fn try_acquire(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);

        let mut current = word.load(Ordering::Relaxed);

        loop {
            if current & mask == 0 {
                return false;
            }

            match word.compare_exchange_weak(
                current,
                current & !mask,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically sets the bit for `index`.
    ///
    /// Setting an already set bit is harmless. The return value tells whether the bit was
    /// previously clear, which the pool uses to detect a double release.
    pub(crate) fn release(&self, index: usize) -> bool {
        let (word, mask) = self.locate(index);

        let previous = word.fetch_or(mask, Ordering::AcqRel);

        previous & mask == 0
    }

    /// Whether the slot at `index` is currently free. Out of range indexes are never free.
    #[expect(clippy::integer_division, reason = "we want the index of the containing word")]
    pub(crate) fn is_free(&self, index: usize) -> bool {
        let Some(word) = self.words.get(index / WORD_BITS) else {
            return false;
        };

        word.load(Ordering::Acquire) & bit_mask(index) != 0
    }

    /// Returns the lowest index of any free slot, scanning the whole bitmap.
    pub(crate) fn find_first_free(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find_map(|(word_index, word)| first_set_bit(word_index, word.load(Ordering::Acquire)))
    }

    /// Returns the index of a free slot below `limit`, starting the scan at the word containing
    /// `start` and wrapping around to the beginning.
    ///
    /// Starting at different words lets concurrent scanners spread out instead of all racing
    /// for the lowest free bit.
    #[expect(clippy::integer_division, reason = "we want the index of the containing word")]
    pub(crate) fn find_first_free_from(&self, start: usize, limit: usize) -> Option<usize> {
        let limit = limit.min(self.words.len().saturating_mul(WORD_BITS));

        if limit == 0 {
            return None;
        }

        let word_count = limit.div_ceil(WORD_BITS);
        let first_word = (start / WORD_BITS) % word_count;

        // The last word may be partially beyond the limit. Those bits are masked out.
        let tail_bits = limit % WORD_BITS;
        let last_word_mask = if tail_bits == 0 {
            u64::MAX
        } else {
            (1_u64 << tail_bits).wrapping_sub(1)
        };

        (first_word..word_count)
            .chain(0..first_word)
            .find_map(|word_index| {
                let word = self
                    .words
                    .get(word_index)
                    .expect("word index is always below word count, which is clamped to the bitmap size");

                let mut bits = word.load(Ordering::Acquire);

                // Will not wrap because word_count >= 1.
                if word_index == word_count.wrapping_sub(1) {
                    bits &= last_word_mask;
                }

                first_set_bit(word_index, bits)
            })
    }

    /// Marks every slot in `range` as free and extends the active range to cover it.
    ///
    /// The caller must ensure the slots in the range are ready to be handed out before calling.
    pub(crate) fn mark_free_range(&self, range: Range<usize>) {
        assert!(
            range.end <= self.words.len().saturating_mul(WORD_BITS),
            "range {range:?} is beyond the bitmap size"
        );

        for index in range.clone() {
            let (word, mask) = self.locate(index);
            word.fetch_or(mask, Ordering::Release);
        }

        self.active.fetch_max(range.end, Ordering::AcqRel);
    }

    /// Number of free slots. Statistics only - this scans every word.
    #[cfg_attr(test, mutants::skip)] // Only feeds statistics, mutations are caught by pool tests.
    pub(crate) fn count_free(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Number of active slots that are checked out. Statistics only - this scans every word.
    pub(crate) fn count_busy(&self) -> usize {
        self.active_len().saturating_sub(self.count_free())
    }

    #[expect(clippy::integer_division, reason = "we want the index of the containing word")]
    fn locate(&self, index: usize) -> (&AtomicU64, u64) {
        let word = self
            .words
            .get(index / WORD_BITS)
            .expect("slot index out of bounds of the availability bitmap");

        (word, bit_mask(index))
    }
}

fn bit_mask(index: usize) -> u64 {
    1_u64 << (index % WORD_BITS)
}

fn first_set_bit(word_index: usize, bits: u64) -> Option<usize> {
    if bits == 0 {
        return None;
    }

    // Will not wrap because the bitmap cannot be larger than virtual memory.
    Some(
        word_index
            .wrapping_mul(WORD_BITS)
            .wrapping_add(bits.trailing_zeros() as usize),
    )
}
