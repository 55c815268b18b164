//! A lock-free object pool that tracks slot availability in an atomic bitmap.
//!
//! This crate provides [`Pool`], a thread-safe pool of pre-created objects. Threads check
//! objects out and back in without ever taking a lock, which makes the pool suitable for hot
//! paths where many threads need short-lived exclusive access to reusable resources such as
//! buffers, parsers or connections.
//!
//! # Key Features
//!
//! - **Lock-free acquire and release**: Slot ownership is claimed with a single atomic
//!   compare-and-swap on a bitmap word
//! - **Tiered acquisition**: Recently released slots are reused first, then per-thread stripes,
//!   then a bitmap scan and finally a round-robin cursor
//! - **RAII handles**: A [`Handle`] dereferences to the object and returns it to the pool when
//!   dropped
//! - **Bounded expansion**: Pools may grow by a configurable ratio up to a configurable limit
//!   when exhausted, without moving existing objects
//! - **Diagnostics**: [`PoolStats`] snapshots plus process-wide metrics published via [`nm`]
//! - **Misuse detection**: Double releases and foreign handles are reported as [`Error`]s
//!
//! # Examples
//!
//! ```rust
//! use bitmask_pool::Pool;
//!
//! // A pool of 4 reusable buffers.
//! let pool = Pool::new(4, || Vec::<u8>::with_capacity(1024)).unwrap();
//!
//! {
//!     let mut buffer = pool.acquire().unwrap();
//!     buffer.clear();
//!     buffer.extend_from_slice(b"hello");
//! } // The buffer goes back to the pool here, keeping its allocation.
//!
//! assert_eq!(pool.stats().total_returns(), 1);
//! ```
//!
//! An expandable pool:
//!
//! ```rust
//! use bitmask_pool::{ExpansionPolicy, Pool};
//!
//! // Starts with 8 slots, grows by 50% when exhausted, up to 8 + 200% = 24 slots.
//! let pool = Pool::builder()
//!     .capacity(8)
//!     .expansion(ExpansionPolicy::new(0.5, 200).unwrap())
//!     .build(String::new)
//!     .unwrap();
//!
//! let handles: Vec<_> = (0..10).map(|_| pool.acquire().unwrap()).collect();
//! assert_eq!(pool.capacity(), 12);
//! # drop(handles);
//! ```
//!
//! # Metrics
//!
//! Every pool in the process reports into the same set of [`nm`] events:
//!
//! * `bitmask_pool_acquired` - successful acquisitions.
//! * `bitmask_pool_released` - slots returned.
//! * `bitmask_pool_exhausted` - acquisitions that found no free slot.
//! * `bitmask_pool_expanded` - times a pool grew.
//! * `bitmask_pool_expansion_slots` - histogram of slots added per expansion.
//!
//! Per-pool figures are available from [`Pool::stats()`].

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod bitmap;
mod builder;
mod drop_policy;
mod error;
mod expansion;
mod factory;
mod free_stack;
mod handle;
mod pool;
mod slot_store;
mod stats;
mod striped;

pub use builder::*;
pub use drop_policy::*;
pub use error::Error;
pub use expansion::*;
pub use factory::*;
pub use handle::*;
pub use pool::*;
pub use stats::{PoolStats, Tier, TierHits};
