use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::{ArcSwap, Guard};

use crate::ObjectFactory;
use crate::error::{Error, Result};

/// Owns the payload objects of a pool and resolves slot indexes to them.
///
/// Payloads live in segments, one per range of slots created at construction or expansion.
/// Segments are never moved or removed, so a payload stays at the same address for the
/// lifetime of the store.
///
/// Index resolution goes through an immutable [`SlotTable`] that is replaced as a whole when
/// the store grows. Readers load whichever table is current and never see a table whose length
/// disagrees with the slots it points to.
pub(crate) struct SlotStore<T> {
    table: ArcSwap<SlotTable<T>>,

    // Only touched when growing. This is the single exclusive section of the pool.
    storage: Mutex<Storage<T>>,
}

struct Storage<T> {
    factory: Box<dyn ObjectFactory<T>>,
    segments: Vec<Box<[UnsafeCell<T>]>>,
}

/// Outcome of a request to grow the store.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Growth {
    /// The store grew and the new slots occupy this range of indexes.
    Grown(Range<usize>),

    /// Another thread grew the store after the caller observed its capacity.
    GrownElsewhere,

    /// The store is already at the largest permitted capacity.
    Capped,
}

impl<T> SlotStore<T> {
    /// Creates a store with `capacity` slots, filled by the factory.
    pub(crate) fn new(capacity: usize, mut factory: Box<dyn ObjectFactory<T>>) -> Result<Self> {
        let segment = allocate_segment(factory.as_mut(), capacity).ok_or_else(|| {
            Error::ExpansionFailure {
                from: 0,
                to: capacity,
                reason: "unable to allocate slot storage".to_string(),
            }
        })?;

        let mut storage = Storage {
            factory,
            segments: Vec::new(),
        };

        storage.segments.push(segment);

        // We take the pointers from the segment only once it has reached its final location.
        let slots = storage
            .segments
            .last()
            .expect("we just pushed a segment")
            .iter()
            .map(SlotPtr::from_cell)
            .collect();

        Ok(Self {
            table: ArcSwap::from_pointee(SlotTable { slots }),
            storage: Mutex::new(storage),
        })
    }

    /// The current slot table. Cheap to call on hot paths.
    pub(crate) fn table(&self) -> Guard<Arc<SlotTable<T>>> {
        self.table.load()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.table.load().capacity()
    }

    /// Resolves an index against the latest table.
    pub(crate) fn resolve(&self, index: usize) -> Option<NonNull<T>> {
        self.table.load().get(index)
    }

    /// Grows the store from `observed_capacity` to the capacity returned by `target`.
    ///
    /// If the store no longer has `observed_capacity` slots by the time we get exclusive access,
    /// somebody else has already grown it and nothing is done. Otherwise `target` is called with
    /// the current capacity and the difference is filled by the factory.
    ///
    /// `publish` is called with the range of new indexes after the new table is visible to
    /// readers, while still holding the exclusive section.
    ///
    /// If allocation fails, the store is left exactly as it was.
    pub(crate) fn grow<F, P>(&self, observed_capacity: usize, target: F, publish: P) -> Result<Growth>
    where
        F: FnOnce(usize) -> usize,
        P: FnOnce(Range<usize>),
    {
        // Nothing in the storage is left half-updated by a panic in the factory
        // because we only commit after the factory has finished, so poisoning is harmless.
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.table.load_full();
        let current_capacity = current.capacity();

        if current_capacity != observed_capacity {
            return Ok(Growth::GrownElsewhere);
        }

        let new_capacity = target(current_capacity);

        if new_capacity <= current_capacity {
            return Ok(Growth::Capped);
        }

        let allocation_failure = |reason: &str| Error::ExpansionFailure {
            from: current_capacity,
            to: new_capacity,
            reason: reason.to_string(),
        };

        // Will not wrap because we just checked that new_capacity is greater.
        let added = new_capacity.wrapping_sub(current_capacity);

        let segment = allocate_segment(storage.factory.as_mut(), added)
            .ok_or_else(|| allocation_failure("unable to allocate slot storage"))?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(new_capacity)
            .map_err(|_| allocation_failure("unable to allocate slot table"))?;

        storage
            .segments
            .try_reserve(1)
            .map_err(|_| allocation_failure("unable to allocate segment list"))?;

        // Nothing below can fail, so this is the point of commitment.
        storage.segments.push(segment);

        slots.extend_from_slice(&current.slots);
        slots.extend(
            storage
                .segments
                .last()
                .expect("we just pushed a segment")
                .iter()
                .map(SlotPtr::from_cell),
        );

        self.table.store(Arc::new(SlotTable {
            slots: slots.into_boxed_slice(),
        }));

        let range = current_capacity..new_capacity;
        publish(range.clone());

        Ok(Growth::Grown(range))
    }
}

impl<T> fmt::Debug for SlotStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotStore")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Maps slot indexes to payload addresses for one capacity of the store.
pub(crate) struct SlotTable<T> {
    slots: Box<[SlotPtr<T>]>,
}

impl<T> SlotTable<T> {
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<NonNull<T>> {
        self.slots.get(index).map(|slot| slot.0)
    }
}

impl<T> fmt::Debug for SlotTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .finish()
    }
}

struct SlotPtr<T>(NonNull<T>);

impl<T> SlotPtr<T> {
    fn from_cell(cell: &UnsafeCell<T>) -> Self {
        Self(NonNull::from(cell).cast())
    }
}

impl<T> Clone for SlotPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotPtr<T> {}

// SAFETY: The pointer is only dereferenced by the holder of the slot, who has exclusive access
// to the payload as proven by winning the slot's availability bit. Moving the table between
// threads therefore only ever moves payloads between threads, which requires `T: Send`.
unsafe impl<T: Send> Send for SlotPtr<T> {}

// SAFETY: Sharing the table only shares addresses. Access to the payload behind an address is
// exclusive to one holder at a time (see above), so again only `T: Send` is needed.
unsafe impl<T: Send> Sync for SlotPtr<T> {}

fn allocate_segment<T>(factory: &mut dyn ObjectFactory<T>, count: usize) -> Option<Box<[UnsafeCell<T>]>> {
    let mut values = Vec::new();
    values.try_reserve_exact(count).ok()?;

    values.extend((0..count).map(|_| UnsafeCell::new(factory.create())));

    Some(values.into_boxed_slice())
}
