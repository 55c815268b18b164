//! Basic usage of the `bitmask_pool` crate:
//!
//! * Creating a pool of reusable buffers.
//! * Checking buffers out from multiple threads.
//! * Letting the pool grow when demand exceeds the initial capacity.
//! * Inspecting pool statistics.

use std::thread;
use std::time::Duration;

use bitmask_pool::{ExpansionPolicy, Pool};

fn main() {
    // Four buffers to start with. When all are in use, the pool may grow by half its size at a
    // time, up to 4 + 300% = 16 buffers.
    let pool = Pool::builder()
        .capacity(4)
        .expansion(ExpansionPolicy::new(0.5, 300).unwrap())
        .build(|| Vec::<u8>::with_capacity(4096))
        .unwrap();

    thread::scope(|s| {
        for worker in 0..8 {
            let pool = &pool;

            s.spawn(move || {
                // Acquisition never blocks. It either finds a free buffer, grows the pool or
                // reports that the pool is exhausted.
                let Some(mut buffer) = pool.acquire() else {
                    println!("Worker {worker} found no free buffer");
                    return;
                };

                // Buffers keep whatever the previous holder left in them.
                buffer.clear();
                buffer.extend_from_slice(format!("output of worker {worker}").as_bytes());

                thread::sleep(Duration::from_millis(10));

                println!(
                    "Worker {worker} used buffer {}: {}",
                    buffer.index(),
                    String::from_utf8_lossy(&buffer)
                );

                // Dropping the handle returns the buffer to the pool.
            });
        }
    });

    println!(
        "Pool grew from 4 to {} of at most {} buffers",
        pool.capacity(),
        pool.max_capacity()
    );

    println!("{}", pool.stats());
}
