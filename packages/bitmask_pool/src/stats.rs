use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use nm::{Event, Magnitude};

// Process-wide metrics, summed over all pools. Collect with `nm::Report::collect()`.
thread_local! {
    static ACQUIRED: Event = Event::builder()
        .name("bitmask_pool_acquired")
        .build();

    static RELEASED: Event = Event::builder()
        .name("bitmask_pool_released")
        .build();

    static EXHAUSTED: Event = Event::builder()
        .name("bitmask_pool_exhausted")
        .build();

    static EXPANDED: Event = Event::builder()
        .name("bitmask_pool_expanded")
        .build();

    static EXPANSION_SLOTS: Event = Event::builder()
        .name("bitmask_pool_expansion_slots")
        .histogram(EXPANSION_SLOTS_BUCKETS)
        .build();
}

const EXPANSION_SLOTS_BUCKETS: &[Magnitude] = &[1, 2, 4, 8, 16, 64, 256, 1024, 4096, 16384];

/// The acquisition strategy that produced a slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Tier {
    /// A recently released index taken from the free index cache.
    Stack,

    /// A probe around the cursor of the calling thread's stripe.
    Striped,

    /// A scan of the availability bitmap.
    Scan,

    /// The round-robin ring cursor fallback.
    Ring,
}

/// Per-pool counters, updated with relaxed atomics on every operation.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    // The two busiest counters get their own cache lines.
    total_gets: CachePadded<AtomicU64>,
    total_returns: CachePadded<AtomicU64>,

    total_expansions: AtomicU64,
    expansion_hits: AtomicU64,

    stack_hits: AtomicU64,
    striped_hits: AtomicU64,
    scan_hits: AtomicU64,
    ring_hits: AtomicU64,
}

impl Counters {
    pub(crate) fn record_get(&self, tier: Tier) {
        self.total_gets.fetch_add(1, Ordering::Relaxed);

        let tier_counter = match tier {
            Tier::Stack => &self.stack_hits,
            Tier::Striped => &self.striped_hits,
            Tier::Scan => &self.scan_hits,
            Tier::Ring => &self.ring_hits,
        };

        tier_counter.fetch_add(1, Ordering::Relaxed);

        ACQUIRED.with(|e| e.observe_once());
    }

    pub(crate) fn record_return(&self) {
        self.total_returns.fetch_add(1, Ordering::Relaxed);

        RELEASED.with(|e| e.observe_once());
    }

    #[cfg_attr(test, mutants::skip)] // Only feeds process-wide metrics.
    #[expect(
        clippy::unused_self,
        reason = "all recording goes through the counters of the pool, even if only global"
    )]
    pub(crate) fn record_exhausted(&self) {
        EXHAUSTED.with(|e| e.observe_once());
    }

    pub(crate) fn record_expansion_hit(&self) {
        self.expansion_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expansion(&self, added_slots: usize) {
        self.total_expansions.fetch_add(1, Ordering::Relaxed);

        EXPANDED.with(|e| e.observe_once());
        EXPANSION_SLOTS.with(|e| {
            e.observe(Magnitude::try_from(added_slots).unwrap_or(Magnitude::MAX));
        });
    }

    pub(crate) fn snapshot(&self, capacity: usize, free_count: usize, busy_count: usize) -> PoolStats {
        PoolStats {
            capacity,
            free_count,
            busy_count,
            total_gets: self.total_gets.load(Ordering::Relaxed),
            total_returns: self.total_returns.load(Ordering::Relaxed),
            total_expansions: self.total_expansions.load(Ordering::Relaxed),
            expansion_hits: self.expansion_hits.load(Ordering::Relaxed),
            cache_hits_by_tier: TierHits {
                stack: self.stack_hits.load(Ordering::Relaxed),
                striped: self.striped_hits.load(Ordering::Relaxed),
                scan: self.scan_hits.load(Ordering::Relaxed),
                ring: self.ring_hits.load(Ordering::Relaxed),
            },
        }
    }
}

/// How many acquisitions each [`Tier`] satisfied.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TierHits {
    stack: u64,
    striped: u64,
    scan: u64,
    ring: u64,
}

impl TierHits {
    /// Number of acquisitions satisfied by the given tier.
    #[must_use]
    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Stack => self.stack,
            Tier::Striped => self.striped,
            Tier::Scan => self.scan,
            Tier::Ring => self.ring,
        }
    }

    /// Number of acquisitions over all tiers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.stack
            .saturating_add(self.striped)
            .saturating_add(self.scan)
            .saturating_add(self.ring)
    }
}

/// A point-in-time view of the state and history of a [`Pool`][crate::Pool].
///
/// The individual values are read one after another while other threads may be operating on
/// the pool, so they are only guaranteed to be mutually consistent when the pool is quiescent.
///
/// # Examples
///
/// ```
/// use bitmask_pool::Pool;
///
/// let pool = Pool::new(4, || 0_u32).unwrap();
///
/// let handle = pool.acquire().unwrap();
///
/// let stats = pool.stats();
/// assert_eq!(stats.capacity(), 4);
/// assert_eq!(stats.busy_count(), 1);
/// assert_eq!(stats.total_gets(), 1);
///
/// println!("{stats}");
/// # drop(handle);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStats {
    capacity: usize,
    free_count: usize,
    busy_count: usize,
    total_gets: u64,
    total_returns: u64,
    total_expansions: u64,
    expansion_hits: u64,
    cache_hits_by_tier: TierHits,
}

impl PoolStats {
    /// Number of slots in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots available for acquisition.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Number of slots currently checked out.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.busy_count
    }

    /// Number of successful acquisitions since the pool was created.
    #[must_use]
    pub fn total_gets(&self) -> u64 {
        self.total_gets
    }

    /// Number of releases since the pool was created.
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.total_returns
    }

    /// Number of times the pool has grown.
    #[must_use]
    pub fn total_expansions(&self) -> u64 {
        self.total_expansions
    }

    /// Number of times an acquisition exhausted every tier and asked for the pool to grow,
    /// whether or not the pool actually grew as a result.
    #[must_use]
    pub fn expansion_hits(&self) -> u64 {
        self.expansion_hits
    }

    /// Successful acquisitions broken down by the tier that produced the slot.
    #[must_use]
    pub fn cache_hits_by_tier(&self) -> TierHits {
        self.cache_hits_by_tier
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "capacity: {} ({} free, {} busy)",
            self.capacity, self.free_count, self.busy_count
        )?;
        writeln!(
            f,
            "gets: {}, returns: {}",
            self.total_gets, self.total_returns
        )?;
        writeln!(
            f,
            "expansions: {} (requested {} times)",
            self.total_expansions, self.expansion_hits
        )?;
        write!(
            f,
            "tier hits: stack {}, striped {}, scan {}, ring {}",
            self.cache_hits_by_tier.stack,
            self.cache_hits_by_tier.striped,
            self.cache_hits_by_tier.scan,
            self.cache_hits_by_tier.ring
        )
    }
}
