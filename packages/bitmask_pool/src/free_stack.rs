use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Upper bound on how many indexes the stack caches, regardless of pool capacity.
const LIMIT_MAX: usize = 1000;

/// Marks the end of the linked list of cached indexes.
const NIL: u32 = 0;

/// Lock-free cache of recently released slot indexes.
///
/// This is a Treiber stack whose nodes are the slot indexes themselves: `next[i]` holds the
/// successor of slot `i` while `i` is on the stack. The head is a single 64-bit word combining
/// the top of the stack with a stamp that is incremented on every successful push and pop. The
/// stamp is what keeps a delayed pop from succeeding against a head that was popped and pushed
/// back in the meantime (the ABA hazard), because `next[top]` may have changed in between.
///
/// The stack is a cache, not a source of truth. An index may be handed out through the bitmap
/// while it is still on the stack, so every popped index must be validated against the bitmap.
/// Pushes beyond the limit are dropped, as the index remains discoverable by scanning.
#[derive(Debug)]
pub(crate) struct FreeIndexStack {
    // Stamp in the upper 32 bits, top in the lower 32 bits. Top is stored as index + 1 so that
    // NIL can represent the empty stack.
    head: AtomicU64,

    next: Box<[AtomicU32]>,

    // Whether an index is currently linked into the stack. An index must never be linked twice,
    // as that would turn the list into a cycle.
    on_stack: Box<[AtomicBool]>,

    // Counts reservations, which are taken before linking and released after unlinking,
    // so this never underflows even under races.
    len: AtomicUsize,

    limit: AtomicUsize,
}

impl FreeIndexStack {
    /// Creates an empty stack able to link any index below `max_index_count`.
    ///
    /// # Panics
    ///
    /// Panics if `max_index_count` does not fit in the packed head word.
    pub(crate) fn new(max_index_count: usize, capacity: usize) -> Self {
        assert!(
            u32::try_from(max_index_count).is_ok_and(|count| count < u32::MAX),
            "free index stack cannot track {max_index_count} indexes"
        );

        Self {
            head: AtomicU64::new(Head::EMPTY.0),
            next: (0..max_index_count).map(|_| AtomicU32::new(NIL)).collect(),
            on_stack: (0..max_index_count).map(|_| AtomicBool::new(false)).collect(),
            len: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit_for_capacity(capacity)),
        }
    }

    /// Adjusts the number of cached indexes to suit a new pool capacity.
    pub(crate) fn resize_for_capacity(&self, capacity: usize) {
        self.limit
            .store(limit_for_capacity(capacity), Ordering::Relaxed);
    }

    /// The maximum number of indexes currently cached.
    pub(crate) fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// The number of cached indexes. This is a snapshot that may be stale immediately.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Pushes an index onto the stack.
    ///
    /// Returns `false` if the index was not cached, either because the stack is full or
    /// because the index is already on the stack.
    pub(crate) fn push(&self, index: usize) -> bool {
        let link = to_link(index);

        let previous_len = self.len.fetch_add(1, Ordering::Relaxed);
        if previous_len >= self.limit() {
            self.len.fetch_sub(1, Ordering::Relaxed);
            return false;
        }

        let on_stack = self
            .on_stack
            .get(index)
            .expect("index out of bounds of the free index stack");

        if on_stack.swap(true, Ordering::AcqRel) {
            self.len.fetch_sub(1, Ordering::Relaxed);
            return false;
        }

        let next = self
            .next
            .get(index)
            .expect("index out of bounds of the free index stack");

        let mut current = Head(self.head.load(Ordering::Acquire));

        loop {
            // The link is published by the release ordering of the head swap below.
            next.store(current.top(), Ordering::Relaxed);

            let new = current.advance(link);

            match self.head.compare_exchange_weak(
                current.0,
                new.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = Head(actual),
            }
        }
    }

    /// Pops the most recently pushed index, if any.
    pub(crate) fn pop(&self) -> Option<usize> {
        let mut current = Head(self.head.load(Ordering::Acquire));

        loop {
            let top = current.top();
            let index = from_link(top)?;

            // If another thread pops this index and pushes it back with a different successor
            // before our swap, the stamp will have moved on and the swap fails.
            let successor = self
                .next
                .get(index)
                .expect("linked index is always in bounds")
                .load(Ordering::Relaxed);

            let new = current.advance(successor);

            match self.head.compare_exchange_weak(
                current.0,
                new.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.on_stack
                        .get(index)
                        .expect("linked index is always in bounds")
                        .store(false, Ordering::Release);

                    self.len.fetch_sub(1, Ordering::Relaxed);

                    return Some(index);
                }
                Err(actual) => current = Head(actual),
            }
        }
    }

    #[cfg(test)]
    fn stamp(&self) -> u32 {
        Head(self.head.load(Ordering::Acquire)).stamp()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Head(u64);

impl Head {
    const EMPTY: Self = Self(0);

    #[expect(
        clippy::cast_possible_truncation,
        reason = "we intentionally take the lower half of the packed word"
    )]
    fn top(self) -> u32 {
        self.0 as u32
    }

    fn stamp(self) -> u32 {
        u32::try_from(self.0 >> 32).expect("upper half of a u64 always fits in u32")
    }

    /// Replaces the top and increments the stamp.
    fn advance(self, top: u32) -> Self {
        // Wrapping is fine - a stale head would need to survive 2^32 operations to collide.
        let stamp = self.stamp().wrapping_add(1);

        Self((u64::from(stamp) << 32) | u64::from(top))
    }
}

#[expect(
    clippy::integer_division,
    reason = "a quarter of the capacity, rounded down, is precise enough for a cache size"
)]
fn limit_for_capacity(capacity: usize) -> usize {
    (capacity / 4).clamp(1, LIMIT_MAX)
}

fn to_link(index: usize) -> u32 {
    u32::try_from(index)
        .ok()
        .and_then(|index| index.checked_add(1))
        .expect("index was verified to fit at construction time")
}

fn from_link(link: u32) -> Option<usize> {
    link.checked_sub(1).map(|index| index as usize)
}
