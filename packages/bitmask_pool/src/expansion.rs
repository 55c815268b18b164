use crate::error::{Result, invalid_configuration};

/// Largest accepted `max_expansion_percent`, i.e. a pool may grow to at most 11x its
/// initial capacity.
pub const MAX_EXPANSION_PERCENT_LIMIT: u32 = 1000;

/// Governs how an expandable [`Pool`][crate::Pool] grows when every slot is checked out.
///
/// Each expansion grows the pool by `ratio` times its current capacity (at least one slot),
/// never exceeding `initial_capacity + initial_capacity * max_expansion_percent / 100`
/// (rounded down).
///
/// # Examples
///
/// ```
/// use bitmask_pool::ExpansionPolicy;
///
/// // Grow by 50% each time, up to 3x the initial size.
/// let policy = ExpansionPolicy::new(0.5, 200).unwrap();
///
/// assert_eq!(policy.max_capacity(10), Some(30));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpansionPolicy {
    ratio: f64,
    max_expansion_percent: u32,
}

impl ExpansionPolicy {
    /// Creates a new expansion policy.
    ///
    /// * `ratio` - fraction of the current capacity to add on each expansion,
    ///   in the range `(0.0, 1.0]`.
    /// * `max_expansion_percent` - how far beyond the initial capacity the pool may grow, as a
    ///   percentage of the initial capacity, in the range `1..=1000`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`][crate::Error::InvalidConfiguration] if either
    /// value is out of range.
    pub fn new(ratio: f64, max_expansion_percent: u32) -> Result<Self> {
        // Written this way so that NaN is rejected as well.
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid_configuration(format!(
                "expansion ratio must be in (0.0, 1.0] but was {ratio}"
            )));
        }

        if !(1..=MAX_EXPANSION_PERCENT_LIMIT).contains(&max_expansion_percent) {
            return Err(invalid_configuration(format!(
                "maximum expansion must be in 1..={MAX_EXPANSION_PERCENT_LIMIT} percent but was {max_expansion_percent}"
            )));
        }

        Ok(Self {
            ratio,
            max_expansion_percent,
        })
    }

    /// Fraction of the current capacity added on each expansion.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Maximum growth beyond the initial capacity, as a percentage of the initial capacity.
    #[must_use]
    pub fn max_expansion_percent(&self) -> u32 {
        self.max_expansion_percent
    }

    /// The largest capacity a pool with the given initial capacity may reach, or `None` if
    /// that would overflow `usize`.
    #[must_use]
    pub fn max_capacity(&self, initial_capacity: usize) -> Option<usize> {
        let extra = initial_capacity
            .checked_mul(self.max_expansion_percent as usize)?
            .checked_div(100)?;

        initial_capacity.checked_add(extra)
    }

    /// The capacity to grow to from `current`, capped at `max_capacity`.
    ///
    /// A result equal to `current` means the cap has been reached.
    #[must_use]
    pub(crate) fn next_capacity(&self, current: usize, max_capacity: usize) -> usize {
        #[expect(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "the growth step is an estimate - precision loss on huge pools is irrelevant and the value is clamped below"
        )]
        let step = (current as f64 * self.ratio).floor() as usize;

        current
            .saturating_add(step.max(1))
            .min(max_capacity)
            .max(current)
    }
}
