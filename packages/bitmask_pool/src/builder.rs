use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::thread;

use crate::error::{Result, invalid_configuration};
use crate::{DropPolicy, ExpansionPolicy, ObjectFactory, Pool};

/// Largest capacity any pool may ever reach, including after expansion.
///
/// Slot indexes are packed into 32 bits inside the free index cache.
pub const MAX_CAPACITY: usize = (u32::MAX - 1) as usize;

/// Validated configuration of a [`Pool`].
///
/// Obtain one from [`PoolBuilder::config()`] if you want to create multiple pools with the same
/// configuration via [`Pool::with_config()`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolConfig {
    capacity: NonZero<usize>,
    stripes: Option<NonZero<usize>>,
    expansion: Option<ExpansionPolicy>,
    drop_policy: DropPolicy,
}

impl PoolConfig {
    /// The number of slots created when the pool is built.
    #[must_use]
    pub fn initial_capacity(&self) -> NonZero<usize> {
        self.capacity
    }

    /// The number of stripes used to spread acquisitions, or `None` if striping is disabled.
    #[must_use]
    pub fn stripes(&self) -> Option<NonZero<usize>> {
        self.stripes
    }

    /// Whether the striped acquisition tier is enabled.
    #[must_use]
    pub fn striping(&self) -> bool {
        self.stripes.is_some()
    }

    /// How the pool grows when exhausted, or `None` for a fixed-capacity pool.
    #[must_use]
    pub fn expansion(&self) -> Option<ExpansionPolicy> {
        self.expansion
    }

    /// What happens to checked out slots when the pool is dropped.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// The largest capacity the pool may reach.
    #[must_use]
    pub fn max_capacity(&self) -> usize {
        self.expansion.map_or(self.capacity.get(), |policy| {
            policy
                .max_capacity(self.capacity.get())
                .expect("validated when the configuration was built")
        })
    }
}

/// Builder for creating an instance of [`Pool`].
///
/// The capacity is mandatory, whereas other settings are optional. By default:
///
/// * the pool has a fixed capacity,
/// * striping is enabled with one stripe per available processor,
/// * payloads are dropped together with the pool ([`DropPolicy::MayDropItems`]).
///
/// # Examples
///
/// ```
/// use bitmask_pool::{ExpansionPolicy, Pool};
///
/// let pool = Pool::builder()
///     .capacity(16)
///     .striping(false)
///     .expansion(ExpansionPolicy::new(0.5, 300).unwrap())
///     .build(String::new)
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 16);
/// assert_eq!(pool.max_capacity(), 64);
/// ```
#[must_use]
pub struct PoolBuilder<T> {
    capacity: usize,
    striping: bool,
    stripes: Option<usize>,
    expansion: Option<ExpansionPolicy>,
    drop_policy: DropPolicy,

    _item: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for PoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &self.capacity)
            .field("striping", &self.striping)
            .field("stripes", &self.stripes)
            .field("expansion", &self.expansion)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> PoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            striping: true,
            stripes: None,
            expansion: None,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of slots created when the pool is built. Must be positive.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enables or disables the striped acquisition tier.
    ///
    /// Striping spreads concurrent acquisitions over the slot space, which reduces contention
    /// when many threads acquire at the same time. Single-threaded users may prefer to disable
    /// it, which makes acquisitions fill the pool from the lowest index upward.
    pub fn striping(mut self, enabled: bool) -> Self {
        self.striping = enabled;
        self
    }

    /// Overrides the number of stripes. Implies striping is enabled. Must be positive.
    ///
    /// Defaults to the available parallelism of the system.
    pub fn stripes(mut self, stripes: usize) -> Self {
        self.striping = true;
        self.stripes = Some(stripes);
        self
    }

    /// Allows the pool to grow according to `policy` when every slot is checked out.
    pub fn expansion(mut self, policy: ExpansionPolicy) -> Self {
        self.expansion = Some(policy);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Validates the settings and returns the resulting configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if the
    /// capacity or stripe count is zero or if the pool could grow beyond [`MAX_CAPACITY`].
    pub fn config(&self) -> Result<PoolConfig> {
        let capacity = NonZero::new(self.capacity)
            .ok_or_else(|| invalid_configuration("capacity must be positive"))?;

        let stripes = if self.striping {
            Some(match self.stripes {
                Some(stripes) => NonZero::new(stripes)
                    .ok_or_else(|| invalid_configuration("stripe count must be positive"))?,
                None => default_stripes(),
            })
        } else {
            None
        };

        let config = PoolConfig {
            capacity,
            stripes,
            expansion: self.expansion,
            drop_policy: self.drop_policy,
        };

        let max_capacity = match self.expansion {
            Some(policy) => policy.max_capacity(capacity.get()),
            None => Some(capacity.get()),
        };

        match max_capacity {
            Some(max) if max <= MAX_CAPACITY => Ok(config),
            _ => Err(invalid_configuration(format!(
                "pool of {capacity} slots could grow beyond the maximum of {MAX_CAPACITY} slots"
            ))),
        }
    }

    /// Builds the pool, calling the factory once for every initial slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if the
    /// configuration is invalid or [`Error::ExpansionFailure`][crate::Error::ExpansionFailure]
    /// if the slot storage could not be allocated.
    pub fn build<F>(self, factory: F) -> Result<Pool<T>>
    where
        F: ObjectFactory<T> + 'static,
    {
        Pool::with_config(self.config()?, factory)
    }
}

fn default_stripes() -> NonZero<usize> {
    thread::available_parallelism().unwrap_or(NonZero::<usize>::MIN)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn capacity_is_mandatory() {
        let result = PoolBuilder::<u32>::new().config();

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn defaults_are_fixed_and_striped() {
        let config = PoolBuilder::<u32>::new().capacity(10).config().unwrap();

        assert_eq!(config.initial_capacity().get(), 10);
        assert_eq!(config.max_capacity(), 10);
        assert!(config.striping());
        assert!(config.expansion().is_none());
        assert_eq!(config.drop_policy(), DropPolicy::MayDropItems);
    }

    #[test]
    fn striping_can_be_disabled() {
        let config = PoolBuilder::<u32>::new()
            .capacity(10)
            .striping(false)
            .config()
            .unwrap();

        assert!(!config.striping());
        assert_eq!(config.stripes(), None);
    }

    #[test]
    fn explicit_stripes_enable_striping() {
        let config = PoolBuilder::<u32>::new()
            .capacity(10)
            .striping(false)
            .stripes(3)
            .config()
            .unwrap();

        assert_eq!(config.stripes(), NonZero::new(3));
    }

    #[test]
    fn zero_stripes_rejected() {
        let result = PoolBuilder::<u32>::new().capacity(10).stripes(0).config();

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn max_capacity_includes_expansion() {
        let config = PoolBuilder::<u32>::new()
            .capacity(2)
            .expansion(ExpansionPolicy::new(1.0, 500).unwrap())
            .config()
            .unwrap();

        assert_eq!(config.max_capacity(), 12);
    }

    #[test]
    fn oversized_pool_rejected() {
        let result = PoolBuilder::<u8>::new().capacity(MAX_CAPACITY + 1).config();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));

        let result = PoolBuilder::<u8>::new()
            .capacity(MAX_CAPACITY / 2)
            .expansion(ExpansionPolicy::new(1.0, 1000).unwrap())
            .config();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }
}
