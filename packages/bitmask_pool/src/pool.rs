use std::any::type_name;
use std::fmt;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};

use crate::bitmap::AvailabilityBitmap;
use crate::error::{Error, Result};
use crate::free_stack::FreeIndexStack;
use crate::slot_store::{Growth, SlotStore, SlotTable};
use crate::stats::Counters;
use crate::striped::{NEIGHBORHOOD, StripedTailCounter};
use crate::{
    DropPolicy, ExpansionPolicy, Handle, ObjectFactory, PoolBuilder, PoolConfig, PoolStats,
    RawHandle, Tier,
};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// How many stale indexes we are willing to pop from the free index cache per round.
const STACK_POP_ATTEMPTS: usize = 4;

/// How many times we rescan the bitmap after losing a race for the bit we found.
const SCAN_ATTEMPTS: usize = 8;

/// Upper bound on slot probes per round, however large the pool.
const ATTEMPT_BUDGET_MAX: usize = 4096;

/// A lock-free pool of pre-created objects, shared by any number of threads.
///
/// The pool holds a population of payload objects created up front by an [`ObjectFactory`].
/// Threads check payloads out via [`acquire()`][Self::acquire], receiving a [`Handle`] with
/// exclusive access, and return them by dropping the handle or via
/// [`release()`][Self::release]. Payloads are reused as-is, never recreated.
///
/// # Acquisition
///
/// Which slots are free is recorded in a bitmap with one bit per slot. Acquisition tries
/// several strategies in order, each of which ends in an atomic claim of a free bit:
///
/// 1. Recently released slots, from a lock-free cache of free indexes.
/// 2. A small neighborhood around the cursor of the calling thread's stripe (if striping is
///    enabled), which spreads concurrent threads over the pool.
/// 3. A scan of the bitmap for any free bit.
/// 4. A round-robin cursor over the whole pool.
///
/// Neither acquisition nor release ever takes a lock. If every strategy fails, a fixed-capacity
/// pool reports exhaustion, while an expandable pool grows (see below) and tries again.
///
/// # Expansion
///
/// A pool built with an [`ExpansionPolicy`] appends new slots when it runs out, up to the
/// maximum capacity of the policy. Growing is the only operation that takes a lock. Existing
/// slots are never moved or recreated, and capacity never shrinks.
///
/// # Examples
///
/// ```
/// use bitmask_pool::Pool;
///
/// let pool = Pool::new(3, || Vec::<u8>::with_capacity(64)).unwrap();
///
/// let mut a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// let c = pool.acquire().unwrap();
///
/// a.extend_from_slice(b"request data");
///
/// // Every slot is checked out.
/// assert!(pool.acquire().is_none());
///
/// // Returning one makes it available again.
/// drop(b);
/// assert!(pool.acquire().is_some());
/// # drop((a, c));
/// ```
///
/// Sharing between threads:
///
/// ```
/// use std::thread;
///
/// use bitmask_pool::Pool;
///
/// let pool = Pool::new(4, || 0_u64).unwrap();
///
/// thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             for _ in 0..100 {
///                 if let Some(mut counter) = pool.acquire() {
///                     *counter += 1;
///                 }
///             }
///         });
///     }
/// });
///
/// let stats = pool.stats();
/// assert_eq!(stats.total_gets(), stats.total_returns());
/// ```
pub struct Pool<T> {
    id: u64,
    config: PoolConfig,
    max_capacity: usize,

    bitmap: AvailabilityBitmap,
    stack: FreeIndexStack,
    stripes: Option<StripedTailCounter>,
    ring: CachePadded<AtomicUsize>,

    slots: SlotStore<T>,
    counters: Counters,
}

impl<T> Pool<T> {
    /// Creates a fixed-capacity pool with `capacity` slots, each filled by `factory`.
    ///
    /// Striping is enabled with the default stripe count. Use [`builder()`][Self::builder]
    /// for other configurations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `capacity` is zero or exceeds
    /// [`MAX_CAPACITY`][crate::MAX_CAPACITY].
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        Self::builder().capacity(capacity).build(factory)
    }

    /// Creates a pool that grows when exhausted.
    ///
    /// Each expansion adds `expansion_ratio` times the current capacity (at least one slot), up
    /// to `initial_capacity` plus `max_expansion_percent` percent of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `initial_capacity` is zero,
    /// `expansion_ratio` is outside `(0.0, 1.0]` or `max_expansion_percent` is outside
    /// `1..=1000`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bitmask_pool::Pool;
    ///
    /// let pool = Pool::new_expandable(2, || 0_u32, 1.0, 500).unwrap();
    ///
    /// let handles: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
    ///
    /// assert!(pool.capacity() >= 5);
    /// assert!(pool.stats().total_expansions() >= 1);
    /// # drop(handles);
    /// ```
    pub fn new_expandable<F>(
        initial_capacity: usize,
        factory: F,
        expansion_ratio: f64,
        max_expansion_percent: u32,
    ) -> Result<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        Self::builder()
            .capacity(initial_capacity)
            .expansion(ExpansionPolicy::new(expansion_ratio, max_expansion_percent)?)
            .build(factory)
    }

    /// Starts building a new [`Pool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::new()
    }

    /// Creates a pool from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExpansionFailure`] if the initial slot storage cannot be allocated.
    pub fn with_config<F>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: ObjectFactory<T> + 'static,
    {
        let capacity = config.initial_capacity().get();
        let max_capacity = config.max_capacity();

        let slots = SlotStore::new(capacity, Box::new(factory))?;

        let bitmap = AvailabilityBitmap::new(max_capacity);
        bitmap.mark_free_range(0..capacity);

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            max_capacity,
            bitmap,
            stack: FreeIndexStack::new(max_capacity, capacity),
            stripes: config.stripes().map(StripedTailCounter::new),
            ring: CachePadded::new(AtomicUsize::new(0)),
            slots,
            counters: Counters::default(),
        })
    }

    /// The current number of slots in the pool. Only ever grows.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// The largest capacity the pool may reach by expanding.
    ///
    /// For a fixed-capacity pool, this is the same as [`capacity()`][Self::capacity].
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// The configuration the pool was created with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the slot at `index` is currently free.
    ///
    /// This is a diagnostic snapshot that may be outdated by the time it is returned.
    /// Indexes beyond the current capacity are never available.
    #[must_use]
    pub fn is_available(&self, index: usize) -> bool {
        index < self.capacity() && self.bitmap.is_free(index)
    }

    /// Checks out a free slot, growing the pool if permitted and necessary.
    ///
    /// Returns `None` if every slot is checked out and the pool cannot grow. This never blocks
    /// apart from the brief exclusive section taken when the pool grows.
    ///
    /// # Panics
    ///
    /// Propagates any panic from the factory when the pool grows.
    #[must_use]
    pub fn acquire(&self) -> Option<Handle<'_, T>> {
        self.try_acquire().ok()
    }

    /// Checks out a free slot, growing the pool if permitted and necessary.
    ///
    /// This is the same as [`acquire()`][Self::acquire] but reports why acquisition failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if every slot is checked out and the pool cannot grow,
    /// either because it has a fixed capacity, because it has reached its maximum capacity or
    /// because allocating additional slots failed.
    pub fn try_acquire(&self) -> Result<Handle<'_, T>> {
        self.acquire_or_expand().ok_or_else(|| {
            self.counters.record_exhausted();

            Error::PoolExhausted {
                capacity: self.capacity(),
            }
        })
    }

    /// Checks out a free slot, retrying until one becomes available or `timeout` elapses.
    ///
    /// Between attempts, the calling thread spins briefly and then yields. Abandoning the wait
    /// at any point leaves the pool unaffected.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use bitmask_pool::Pool;
    ///
    /// let pool = Pool::new(1, || 0_u8).unwrap();
    ///
    /// let held = pool.acquire().unwrap();
    /// assert!(pool.acquire_timeout(Duration::from_millis(10)).is_none());
    ///
    /// drop(held);
    /// assert!(pool.acquire_timeout(Duration::from_millis(10)).is_some());
    /// ```
    #[must_use]
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Handle<'_, T>> {
        // A timeout too large to represent is as good as none at all.
        let deadline = Instant::now().checked_add(timeout);
        let backoff = Backoff::new();

        loop {
            if let Some(handle) = self.acquire_or_expand() {
                return Some(handle);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.counters.record_exhausted();
                tracing::trace!(?timeout, capacity = self.capacity(), "acquire timed out");
                return None;
            }

            backoff.snooze();
        }
    }

    /// Returns a slot to the pool.
    ///
    /// Returns `false` if the handle was issued by a different pool. The slot is returned to the
    /// pool that issued it either way. Dropping the handle has the same effect as releasing it,
    /// so you only need this method if you care about the result.
    pub fn release(&self, handle: Handle<'_, T>) -> bool {
        self.try_release(handle).is_ok()
    }

    /// Returns a slot to the pool, reporting any misuse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHandle`] if the handle was issued by a different pool. In that
    /// case, the handle is returned to the pool that issued it.
    pub fn try_release(&self, handle: Handle<'_, T>) -> Result<()> {
        if !handle.belongs_to(self) {
            let index = handle.index();

            // Dropping it returns it to its own pool.
            drop(handle);

            return Err(Error::UnknownHandle { index });
        }

        let index = handle.forget();
        self.return_slot(index)
    }

    /// Returns a slot checked out as a [`RawHandle`] to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHandle`] if the raw handle was issued by a different pool and
    /// [`Error::DoubleRelease`] if the slot is not checked out.
    ///
    /// # Safety
    ///
    /// The raw handle must not have been released already, unless the slot has not been
    /// acquired again since - otherwise this would release a slot that belongs to a different
    /// holder. The caller must not use any handle obtained via [`from_raw()`][Self::from_raw]
    /// from this raw handle after this call.
    pub unsafe fn release_raw(&self, raw: RawHandle) -> Result<()> {
        self.verify_raw(raw)?;
        self.return_slot(raw.index())
    }

    /// Exchanges a [`RawHandle`] for a [`Handle`] with access to the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownHandle`] if the raw handle was issued by a different pool and
    /// [`Error::DoubleRelease`] if the slot is not checked out.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the raw handle has not been released and that no other
    /// [`Handle`] created from the same raw handle exists, as that would alias the payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use bitmask_pool::Pool;
    ///
    /// let pool = Pool::new(1, || 10_u32).unwrap();
    ///
    /// let raw = pool.acquire().unwrap().into_raw();
    ///
    /// // SAFETY: The raw handle came from this pool and is exchanged only once.
    /// let handle = unsafe { pool.from_raw(raw) }.unwrap();
    /// assert_eq!(*handle, 10);
    /// ```
    pub unsafe fn from_raw(&self, raw: RawHandle) -> Result<Handle<'_, T>> {
        self.verify_raw(raw)?;

        let index = raw.index();

        if self.bitmap.is_free(index) {
            return Err(Error::DoubleRelease { index });
        }

        let payload = self
            .slots
            .resolve(index)
            .expect("verified that the index is below capacity");

        Ok(Handle::new(self, index, payload))
    }

    /// A snapshot of the pool's state and counters.
    ///
    /// This scans the whole availability bitmap, so avoid calling it on a hot path.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(
            self.capacity(),
            self.bitmap.count_free(),
            self.bitmap.count_busy(),
        )
    }

    /// Tears down the pool, dropping all payloads, and returns the final statistics.
    ///
    /// All [`Handle`]s borrow the pool, so none can outlive this call. Slots still checked out
    /// as [`RawHandle`]s are handled according to the [`DropPolicy`].
    ///
    /// # Panics
    ///
    /// Panics if slots are still checked out and the drop policy is
    /// [`DropPolicy::MustNotDropItems`].
    pub fn shutdown(self) -> PoolStats {
        let stats = self.stats();
        drop(self);
        stats
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Marks a slot free and caches its index for quick reuse.
    pub(crate) fn return_slot(&self, index: usize) -> Result<()> {
        if !self.bitmap.release(index) {
            return Err(Error::DoubleRelease { index });
        }

        // If the cache is full, the slot is still found by the bitmap scan.
        self.stack.push(index);

        self.counters.record_return();
        Ok(())
    }

    fn verify_raw(&self, raw: RawHandle) -> Result<()> {
        if raw.pool_id() != self.id || raw.index() >= self.capacity() {
            return Err(Error::UnknownHandle { index: raw.index() });
        }

        Ok(())
    }

    /// Runs acquisition rounds, growing the pool between them, until a slot is found or
    /// the pool cannot grow any further.
    fn acquire_or_expand(&self) -> Option<Handle<'_, T>> {
        loop {
            let table = self.slots.table();

            if let Some(handle) = self.claim(&table) {
                return Some(handle);
            }

            // Each iteration that continues has seen the capacity grow, so this loop ends
            // at the latest when the maximum capacity is reached.
            if !self.expand(table.capacity()) {
                return None;
            }
        }
    }

    /// One round through every acquisition tier, within a bounded number of slot probes.
    fn claim(&self, table: &SlotTable<T>) -> Option<Handle<'_, T>> {
        let capacity =
            NonZero::new(table.capacity()).expect("a pool always has at least one slot");

        let budget = capacity
            .get()
            .saturating_mul(2)
            .min(ATTEMPT_BUDGET_MAX);

        let mut attempts: usize = 0;

        for _ in 0..STACK_POP_ATTEMPTS {
            let Some(index) = self.stack.pop() else {
                break;
            };

            attempts = attempts.saturating_add(1);

            // The cache may hand out an index that was meanwhile taken via another tier.
            // Such stale entries are discarded, not pushed back.
            if self.bitmap.try_acquire(index) {
                return Some(self.checked_out(table, index, Tier::Stack));
            }
        }

        let mut scan_start = 0;

        if let Some(stripes) = &self.stripes {
            let hint = stripes.next_hint(stripes.current_stripe(), capacity);
            scan_start = hint;

            for offset in 0..NEIGHBORHOOD.min(capacity.get()) {
                let index = hint.wrapping_add(offset) % capacity;
                attempts = attempts.saturating_add(1);

                if self.bitmap.try_acquire(index) {
                    return Some(self.checked_out(table, index, Tier::Striped));
                }
            }
        }

        let backoff = Backoff::new();

        for _ in 0..SCAN_ATTEMPTS {
            // Without stripes, we fill the pool from the bottom up.
            let found = if self.stripes.is_some() {
                self.bitmap.find_first_free_from(scan_start, capacity.get())
            } else {
                self.bitmap.find_first_free()
            };

            let Some(index) = found else {
                break;
            };

            attempts = attempts.saturating_add(1);

            if self.bitmap.try_acquire(index) {
                return Some(self.checked_out(table, index, Tier::Scan));
            }

            // Somebody beat us to it. Give them a moment before we look again.
            backoff.spin();
        }

        while attempts < budget {
            let index = self.ring.fetch_add(1, Ordering::Relaxed) % capacity;
            attempts = attempts.saturating_add(1);

            if self.bitmap.try_acquire(index) {
                return Some(self.checked_out(table, index, Tier::Ring));
            }
        }

        None
    }

    fn checked_out(&self, table: &SlotTable<T>, index: usize, tier: Tier) -> Handle<'_, T> {
        // The index may come from slots added after we loaded our table, in which case
        // the latest table is guaranteed to contain it.
        let payload = table
            .get(index)
            .or_else(|| self.slots.resolve(index))
            .expect("a slot marked free in the bitmap is always published in the slot table");

        self.counters.record_get(tier);

        Handle::new(self, index, payload)
    }

    /// Attempts to grow the pool beyond `observed_capacity`.
    ///
    /// Returns `true` if the capacity is now larger than observed, whether by our doing or
    /// because another thread grew the pool first.
    fn expand(&self, observed_capacity: usize) -> bool {
        let Some(policy) = self.config.expansion() else {
            return false;
        };

        // Capacity never shrinks, so a pool seen at its maximum stays there.
        if observed_capacity >= self.max_capacity {
            return false;
        }

        self.counters.record_expansion_hit();

        let growth = self.slots.grow(
            observed_capacity,
            |current| policy.next_capacity(current, self.max_capacity),
            |range| {
                self.stack.resize_for_capacity(range.end);
                self.bitmap.mark_free_range(range);
            },
        );

        match growth {
            Ok(Growth::Grown(range)) => {
                self.counters.record_expansion(range.len());

                if range.end == self.max_capacity {
                    tracing::warn!(
                        from = range.start,
                        to = range.end,
                        "pool expanded to its maximum capacity and cannot grow any further"
                    );
                } else {
                    tracing::debug!(
                        from = range.start,
                        to = range.end,
                        max_capacity = self.max_capacity,
                        "pool expanded"
                    );
                }

                true
            }
            Ok(Growth::GrownElsewhere) => true,
            Ok(Growth::Capped) => {
                tracing::debug!(
                    capacity = observed_capacity,
                    "pool exhausted at maximum capacity"
                );

                false
            }
            Err(error) => {
                tracing::warn!(%error, "pool expansion failed");

                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn bitmap(&self) -> &AvailabilityBitmap {
        &self.bitmap
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        if self.config.drop_policy() != DropPolicy::MustNotDropItems || thread::panicking() {
            return;
        }

        let busy = self.bitmap.count_busy();

        assert!(
            busy == 0,
            "pool dropped with {busy} slots still checked out, which is forbidden by DropPolicy::MustNotDropItems"
        );
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("id", &self.id)
            .field("config", &self.config)
            .field("max_capacity", &self.max_capacity)
            .field("capacity", &self.capacity())
            .field("bitmap", &self.bitmap)
            .field("stack", &self.stack)
            .field("stripes", &self.stripes)
            .field("ring", &self.ring)
            .field("slots", &self.slots)
            .field("counters", &self.counters)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::MAX_CAPACITY;

    assert_impl_all!(Pool<u32>: Send, Sync);
    assert_impl_all!(Pool<std::cell::Cell<u32>>: Send, Sync);
    assert_not_impl_any!(Pool<std::rc::Rc<u32>>: Send, Sync);

    fn unstriped(capacity: usize) -> Pool<usize> {
        let mut next = 0;

        Pool::builder()
            .capacity(capacity)
            .striping(false)
            .build(move || {
                let value = next;
                next += 1;
                value
            })
            .unwrap()
    }

    #[test]
    fn smoke_test() {
        let pool = Pool::new(3, || 0_u32).unwrap();

        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.max_capacity(), 3);

        let mut a = pool.acquire().unwrap();
        *a = 42;
        let b = pool.acquire().unwrap();

        assert_ne!(a.index(), b.index());
        assert_eq!(*a, 42);

        let stats = pool.stats();
        assert_eq!(stats.busy_count(), 2);
        assert_eq!(stats.free_count(), 1);

        drop(a);
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.busy_count(), 0);
        assert_eq!(stats.total_gets(), 2);
        assert_eq!(stats.total_returns(), 2);
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            Pool::new(0, || 0_u32),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn bad_expansion_settings_rejected() {
        assert!(matches!(
            Pool::new_expandable(1, || 0_u32, 0.0, 100),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            Pool::new_expandable(1, || 0_u32, 0.5, 1001),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn factory_called_once_per_slot() {
        let created = Arc::new(AtomicUsize::new(0));

        let pool = Pool::new(5, {
            let created = Arc::clone(&created);
            move || created.fetch_add(1, Ordering::Relaxed)
        })
        .unwrap();

        assert_eq!(created.load(Ordering::Relaxed), 5);

        for _ in 0..10 {
            drop(pool.acquire().unwrap());
        }

        // Payloads are reused, never recreated.
        assert_eq!(created.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn exhausted_fixed_pool_returns_none() {
        let pool = Pool::new(3, || ()).unwrap();

        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        let indexes: HashSet<_> = handles.iter().map(Handle::index).collect();
        assert_eq!(indexes.len(), 3);

        assert!(pool.acquire().is_none());
        assert!(matches!(
            pool.try_acquire(),
            Err(Error::PoolExhausted { capacity: 3 })
        ));

        drop(handles);
    }

    #[test]
    fn released_index_is_reused_first() {
        let pool = Pool::new(3, || ()).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();

        let freed = b.index();
        assert!(pool.release(b));

        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), freed);
        assert_eq!(pool.stats().cache_hits_by_tier().get(Tier::Stack), 1);

        drop((a, c, again));
    }

    #[test]
    fn unstriped_pool_fills_from_bottom() {
        let pool = unstriped(100);

        let handles: Vec<_> = (0..10).map(|_| pool.acquire().unwrap()).collect();

        for (expected, handle) in handles.iter().enumerate() {
            assert_eq!(handle.index(), expected);
            assert_eq!(**handle, expected);
        }

        assert_eq!(pool.stats().cache_hits_by_tier().get(Tier::Scan), 10);
    }

    #[test]
    fn stale_stack_entry_is_skipped() {
        let pool = unstriped(3);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();

        // Puts index 1 into the free index cache.
        let stale = b.index();
        drop(b);

        // A racing thread takes the slot through the bitmap while the index is still cached.
        assert!(pool.bitmap().try_acquire(stale));

        // The cache offers the stale index but the pool must not hand it out.
        assert!(pool.acquire().is_none());
        assert_eq!(pool.stats().cache_hits_by_tier().get(Tier::Stack), 0);

        // Give the slot back the way the racing thread would have.
        pool.return_slot(stale).unwrap();
        assert_eq!(pool.acquire().unwrap().index(), stale);

        drop((a, c));
    }

    #[test]
    fn striped_tier_serves_acquisitions() {
        let pool = Pool::builder()
            .capacity(64)
            .stripes(1)
            .build(|| 0_u8)
            .unwrap();

        let handle = pool.acquire().unwrap();
        assert_eq!(pool.stats().cache_hits_by_tier().get(Tier::Striped), 1);

        drop(handle);
    }

    #[test]
    fn ring_tier_finds_slots_released_mid_round() {
        // With no cache, stripes or free bits, only the ring can find a slot. We verify the
        // ring fallback does not hand out busy slots and stays within capacity.
        let pool = unstriped(4);
        let handles: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();

        for _ in 0..3 {
            assert!(pool.acquire().is_none());
        }

        assert_eq!(pool.stats().total_gets(), 4);
        drop(handles);
    }

    #[test]
    fn expandable_pool_grows_when_exhausted() {
        let created = Arc::new(AtomicUsize::new(0));

        let pool = Pool::new_expandable(
            2,
            {
                let created = Arc::clone(&created);
                move || created.fetch_add(1, Ordering::Relaxed)
            },
            1.0,
            500,
        )
        .unwrap();

        assert_eq!(pool.max_capacity(), 12);

        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(created.load(Ordering::Relaxed), 4);

        let stats = pool.stats();
        assert_eq!(stats.total_expansions(), 1);
        assert_eq!(stats.expansion_hits(), 1);
        assert_eq!(stats.capacity(), 4);
        assert_eq!(stats.busy_count(), 3);
        assert_eq!(stats.free_count(), 1);

        drop(handles);
    }

    #[test]
    fn expansion_stops_at_max_capacity() {
        let pool = Pool::new_expandable(2, || (), 1.0, 500).unwrap();

        let mut handles = Vec::new();
        while let Some(handle) = pool.acquire() {
            handles.push(handle);
        }

        assert_eq!(handles.len(), 12);
        assert_eq!(pool.capacity(), 12);

        // 2 -> 4 -> 8 -> 12.
        assert_eq!(pool.stats().total_expansions(), 3);

        assert!(matches!(
            pool.try_acquire(),
            Err(Error::PoolExhausted { capacity: 12 })
        ));
    }

    #[test]
    fn capped_pool_no_longer_attempts_expansion() {
        let pool = Pool::new_expandable(2, || (), 1.0, 500).unwrap();

        let handles: Vec<_> = (0..12).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.capacity(), pool.max_capacity());

        let hits = pool.stats().expansion_hits();

        for _ in 0..5 {
            assert!(pool.acquire().is_none());
        }

        assert!(pool.acquire_timeout(Duration::from_millis(5)).is_none());
        assert_eq!(pool.stats().expansion_hits(), hits);

        drop(handles);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn unallocatable_storage_is_reported() {
        let result = Pool::new(MAX_CAPACITY, || [0_u8; 4096]);

        assert!(matches!(
            result,
            Err(Error::ExpansionFailure { from: 0, to, .. }) if to == MAX_CAPACITY
        ));
    }

    #[test]
    fn bounded_expansion_of_single_slot() {
        let pool = Pool::new_expandable(1, || (), 0.2, 100).unwrap();

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.stats().total_expansions(), 1);

        drop((first, second));
    }

    #[test]
    fn expanded_slots_keep_payload_state() {
        let pool = Pool::new_expandable(1, || 0_u32, 1.0, 100).unwrap();

        let mut first = pool.acquire().unwrap();
        *first = 11;
        let mut second = pool.acquire().unwrap();
        *second = 22;

        let first_index = first.index();
        drop((first, second));

        // Expansion never moves existing payloads.
        let raw: Vec<_> = (0..2).map(|_| pool.acquire().unwrap().into_raw()).collect();
        let first_again = raw.iter().find(|raw| raw.index() == first_index).unwrap();

        // SAFETY: Raw handles came from this pool and each is exchanged only once.
        let first_again = unsafe { pool.from_raw(*first_again) }.unwrap();
        assert_eq!(*first_again, 11);
        drop(first_again);

        for raw in raw.iter().filter(|raw| raw.index() != first_index) {
            // SAFETY: Raw handles came from this pool and each is released only once.
            unsafe { pool.release_raw(*raw) }.unwrap();
        }
    }

    #[test]
    fn double_release_is_reported() {
        let pool = Pool::new(2, || ()).unwrap();

        let raw = pool.acquire().unwrap().into_raw();

        // SAFETY: Released twice on purpose, with no acquisition in between.
        unsafe {
            pool.release_raw(raw).unwrap();

            assert!(matches!(
                pool.release_raw(raw),
                Err(Error::DoubleRelease { index }) if index == raw.index()
            ));
        }

        let stats = pool.stats();
        assert_eq!(stats.total_returns(), 1);
        assert_eq!(stats.free_count(), 2);
    }

    #[test]
    fn from_raw_of_free_slot_is_reported() {
        let pool = Pool::new(2, || ()).unwrap();

        let raw = pool.acquire().unwrap().into_raw();

        // SAFETY: Released once, then the exchange is expected to fail.
        unsafe {
            pool.release_raw(raw).unwrap();
            assert!(matches!(
                pool.from_raw(raw),
                Err(Error::DoubleRelease { .. })
            ));
        }
    }

    #[test]
    fn foreign_handle_is_reported_and_returned_home() {
        let home = Pool::new(1, || ()).unwrap();
        let other = Pool::new(1, || ()).unwrap();

        let handle = home.acquire().unwrap();
        let index = handle.index();

        assert!(matches!(
            other.try_release(handle),
            Err(Error::UnknownHandle { index: i }) if i == index
        ));

        assert_eq!(other.stats().total_returns(), 0);
        assert_eq!(home.stats().total_returns(), 1);
        assert!(home.is_available(index));
    }

    #[test]
    fn foreign_raw_handle_is_reported() {
        let home = Pool::new(1, || ()).unwrap();
        let other = Pool::new(1, || ()).unwrap();

        let raw = home.acquire().unwrap().into_raw();

        // SAFETY: The release is rejected before touching any slot.
        let result = unsafe { other.release_raw(raw) };
        assert!(matches!(result, Err(Error::UnknownHandle { .. })));

        assert_eq!(other.stats().free_count(), 1);

        // SAFETY: Released once, to the pool that issued it.
        unsafe { home.release_raw(raw) }.unwrap();
    }

    #[test]
    fn release_returns_false_for_foreign_handle() {
        let home = Pool::new(1, || ()).unwrap();
        let other = Pool::new(1, || ()).unwrap();

        assert!(!other.release(home.acquire().unwrap()));
        assert!(home.release(home.acquire().unwrap()));
    }

    #[test]
    fn is_available_out_of_range() {
        let pool = Pool::new_expandable(2, || (), 1.0, 100).unwrap();

        assert!(pool.is_available(1));

        // Within the bitmap but beyond the current capacity.
        assert!(!pool.is_available(2));
        assert!(!pool.is_available(1_000_000));
    }

    #[test]
    fn acquire_timeout_gives_up() {
        let pool = Pool::new(1, || ()).unwrap();
        let held = pool.acquire().unwrap();

        let started = Instant::now();
        assert!(pool.acquire_timeout(Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));

        drop(held);
    }

    #[test]
    fn acquire_timeout_waits_for_release() {
        let pool = Pool::new(1, || ()).unwrap();

        thread::scope(|s| {
            let held = pool.acquire().unwrap();

            s.spawn(move || {
                thread::sleep(Duration::from_millis(20));
                drop(held);
            });

            assert!(pool.acquire_timeout(Duration::from_secs(5)).is_some());
        });
    }

    #[test]
    fn conservation_holds_at_quiescence() {
        let pool = Pool::new_expandable(8, || (), 0.5, 200).unwrap();

        let handles: Vec<_> = (0..13).map(|_| pool.acquire().unwrap()).collect();

        let stats = pool.stats();
        assert_eq!(stats.free_count() + stats.busy_count(), stats.capacity());
        assert_eq!(stats.busy_count(), 13);

        drop(handles);

        let stats = pool.stats();
        assert_eq!(stats.free_count(), stats.capacity());
        assert_eq!(stats.total_gets(), stats.total_returns());
    }

    #[test]
    fn shutdown_returns_final_stats() {
        let pool = Pool::new(2, || ()).unwrap();
        drop(pool.acquire().unwrap());

        let stats = pool.shutdown();

        assert_eq!(stats.total_gets(), 1);
        assert_eq!(stats.total_returns(), 1);
    }

    #[test]
    fn teardown_drops_every_payload() {
        let payload = Arc::new(());

        let pool = Pool::new_expandable(
            2,
            {
                let payload = Arc::clone(&payload);
                move || Arc::clone(&payload)
            },
            1.0,
            100,
        )
        .unwrap();

        // One slot leaked as a raw handle, which the default policy permits.
        let _leaked = pool.acquire().unwrap().into_raw();
        let held: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();
        drop(held);

        // Ours, one per slot and the one captured by the factory.
        assert_eq!(Arc::strong_count(&payload), 6);

        drop(pool);

        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_with_leaked_slot() {
        let pool = Pool::builder()
            .capacity(2)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build(|| ())
            .unwrap();

        _ = pool.acquire().unwrap().into_raw();
    }

    #[test]
    fn must_not_drop_items_accepts_returned_slots() {
        let pool = Pool::builder()
            .capacity(2)
            .drop_policy(DropPolicy::MustNotDropItems)
            .build(|| ())
            .unwrap();

        drop(pool.acquire().unwrap());
        drop(pool);
    }

    #[test]
    fn debug_output_names_item_type() {
        let pool = Pool::new(1, || 0_u16).unwrap();

        let text = format!("{pool:?}");

        assert!(text.contains("u16"));
        assert!(text.contains("max_capacity: 1"));
    }
}
