/// Creates the payload objects that populate the slots of a [`Pool`][crate::Pool].
///
/// The factory is called once per slot when the pool is built and once per appended slot
/// whenever an expandable pool grows. Calls are never concurrent - the pool only invokes the
/// factory while holding its expansion lock - so the factory itself does not need to be `Sync`.
/// It must be `Send` because whichever thread triggers an expansion ends up calling it.
///
/// The factory must not call back into the pool that owns it.
///
/// Any `FnMut() -> T + Send` closure is a factory:
///
/// ```
/// use bitmask_pool::Pool;
///
/// let pool = Pool::new(4, || Vec::<u8>::with_capacity(1024)).unwrap();
///
/// let buffer = pool.acquire().unwrap();
/// assert!(buffer.capacity() >= 1024);
/// ```
pub trait ObjectFactory<T>: Send {
    /// Creates one new payload object.
    fn create(&mut self) -> T;
}

impl<T, F> ObjectFactory<T> for F
where
    F: FnMut() -> T + Send,
{
    fn create(&mut self) -> T {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        next: u32,
    }

    impl ObjectFactory<u32> for Counting {
        fn create(&mut self) -> u32 {
            self.next = self.next.wrapping_add(1);
            self.next
        }
    }

    #[test]
    fn closure_is_factory() {
        let mut created = 0;
        let mut factory = || {
            created += 1;
            created
        };

        assert_eq!(ObjectFactory::<i32>::create(&mut factory), 1);
        assert_eq!(ObjectFactory::<i32>::create(&mut factory), 2);
    }

    #[test]
    fn custom_factory_keeps_state() {
        let mut factory: Box<dyn ObjectFactory<u32>> = Box::new(Counting { next: 10 });

        assert_eq!(factory.create(), 11);
        assert_eq!(factory.create(), 12);
    }
}
