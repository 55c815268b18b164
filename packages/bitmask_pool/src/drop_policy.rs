/// Determines what happens when a pool is dropped while some of its slots are still checked out.
///
/// Safe [`Handle`][crate::Handle]s borrow the pool, so the borrow checker already prevents the
/// pool from being dropped while any of them exist. Slots can only remain checked out at drop
/// time if their handles were converted into [`RawHandle`][crate::RawHandle]s and never released.
///
/// # Examples
///
/// ```
/// use bitmask_pool::{DropPolicy, Pool};
///
/// let pool = Pool::builder()
///     .capacity(8)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build(|| 0_u64)
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// All payloads are dropped together with the pool, including any still referenced by raw
    /// handles. Such raw handles become permanently invalid. This is the default.
    #[default]
    MayDropItems,

    /// The pool will panic if any slot is still checked out when it is dropped.
    ///
    /// This may be valuable when raw handles are stored in external data structures and
    /// leaking one of them indicates a bug in the owner of that data structure.
    MustNotDropItems,
}
