use std::any::type_name;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::Pool;

/// Exclusive access to one checked out slot of a [`Pool`].
///
/// The handle dereferences to the payload of the slot. Dropping the handle returns the slot to
/// the pool. You can also return it explicitly via [`Pool::release()`] or
/// [`Pool::try_release()`], which report whether the handle belonged to the pool.
///
/// The payload is not reset when the slot is returned - the next holder sees whatever state the
/// previous holder left behind.
///
/// # Thread safety
///
/// The handle is `Send` if the payload is `Send`, allowing a checked out payload to be moved
/// to another thread (for example a scoped thread) for processing. It is `Sync` if the payload
/// is `Sync`.
///
/// # Examples
///
/// ```
/// use bitmask_pool::Pool;
///
/// let pool = Pool::new(2, String::new).unwrap();
///
/// {
///     let mut greeting = pool.acquire().unwrap();
///     greeting.push_str("hello");
/// } // Returned to the pool here.
///
/// assert_eq!(pool.stats().total_returns(), 1);
/// ```
#[must_use]
pub struct Handle<'p, T> {
    pool: &'p Pool<T>,
    index: usize,
    payload: NonNull<T>,
}

impl<'p, T> Handle<'p, T> {
    pub(crate) fn new(pool: &'p Pool<T>, index: usize, payload: NonNull<T>) -> Self {
        Self {
            pool,
            index,
            payload,
        }
    }

    /// The index of the slot this handle refers to.
    ///
    /// The index is stable for the lifetime of the pool and below [`Pool::capacity()`].
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Converts the handle into a [`RawHandle`] that does not borrow the pool.
    ///
    /// The slot stays checked out until the raw handle is passed to
    /// [`Pool::release_raw()`] or turned back into a handle via [`Pool::from_raw()`].
    ///
    /// # Examples
    ///
    /// ```
    /// use bitmask_pool::Pool;
    ///
    /// let pool = Pool::new(2, || 0_u32).unwrap();
    ///
    /// let raw = pool.acquire().unwrap().into_raw();
    /// assert!(!pool.is_available(raw.index()));
    ///
    /// // SAFETY: The raw handle came from this pool and is released only once.
    /// unsafe { pool.release_raw(raw) }.unwrap();
    /// assert!(pool.is_available(raw.index()));
    /// ```
    pub fn into_raw(self) -> RawHandle {
        let this = ManuallyDrop::new(self);

        RawHandle {
            pool_id: this.pool.id(),
            index: this.index,
        }
    }

    pub(crate) fn belongs_to(&self, pool: &Pool<T>) -> bool {
        ptr::eq(self.pool, pool)
    }

    /// Gives up the handle without returning the slot. The caller takes over that duty.
    pub(crate) fn forget(self) -> usize {
        ManuallyDrop::new(self).index
    }
}

impl<T> Deref for Handle<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: Holding the handle means we won the availability bit of the slot, so nobody
        // else can access the payload until we give it back. The payload is never moved while
        // the pool exists and the handle borrows the pool.
        unsafe { self.payload.as_ref() }
    }
}

impl<T> DerefMut for Handle<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: See `deref()`. We have `&mut self`, so this is the only reference.
        unsafe { self.payload.as_mut() }
    }
}

impl<T> AsRef<T> for Handle<'_, T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> AsMut<T> for Handle<'_, T> {
    fn as_mut(&mut self) -> &mut T {
        self
    }
}

impl<T> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        self.pool
            .return_slot(self.index)
            .expect("a live handle always refers to a checked out slot of its own pool");
    }
}

impl<T> fmt::Debug for Handle<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

// SAFETY: The handle has exclusive access to the payload, so sending the handle
// is equivalent to sending the payload.
unsafe impl<T: Send> Send for Handle<'_, T> {}

// SAFETY: Sharing the handle only permits shared access to the payload.
unsafe impl<T: Sync> Sync for Handle<'_, T> {}

/// A checked out slot detached from the lifetime of the pool.
///
/// A raw handle carries no access to the payload by itself. It is merely a record that a slot of
/// a specific pool is checked out, to be given back via [`Pool::release_raw()`] or exchanged for
/// a [`Handle`] via [`Pool::from_raw()`].
///
/// Raw handles can be copied, so it is up to the owner to ensure each one is released once.
/// Releasing the same raw handle twice is detected if the slot has not been acquired again in
/// between.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RawHandle {
    pool_id: u64,
    index: usize,
}

impl RawHandle {
    /// The index of the slot this handle refers to.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }
}
