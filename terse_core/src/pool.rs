//! Process-wide worker pools for block fan-out.
//!
//! One rayon pool is built per distinct worker count, lazily on first use,
//! and kept until the process exits. A worker count of 1 still gets its own
//! single-thread pool, so `degree_of_parallelism == 0` really runs on a single thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use rayon::{ThreadPool, ThreadPoolBuilder};

static POOLS: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();

fn pool(workers: usize) -> Option<Arc<ThreadPool>> {
    let pools = POOLS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut pools = pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = pools.get(&workers) {
        return Some(Arc::clone(existing));
    }
    match ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("terse-{}-{}", workers, i))
        .build()
    {
        Ok(built) => {
            log::debug!("created terse worker pool with {} threads", workers);
            let built = Arc::new(built);
            pools.insert(workers, Arc::clone(&built));
            Some(built)
        }
        Err(e) => {
            log::warn!(
                "could not build a {}-thread worker pool ({}); using the global pool",
                workers,
                e
            );
            None
        }
    }
}

/// Runs `op` inside the pool for `workers` threads. Parallel iterators used
/// by `op` fan out over that pool only.
pub(crate) fn install<R, F>(workers: usize, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match pool(workers.max(1)) {
        Some(pool) => pool.install(op),
        None => op(),
    }
}
