//! Bounded worker pool for per-item stage work.
//!
//! A dedicated rayon pool with exactly `max_concurrency` threads is built for each
//! stage run and drained before returning. Each item is processed exactly once; an
//! error or panic in one item is recorded for that item only.

use anyhow::anyhow;
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

use crate::config::MaxConcurrency;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(max: MaxConcurrency) -> Self {
        Self { workers: max.get() }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item and block until all are done. Results come back in input order.
    pub fn map<T, R, F>(&self, label: &str, items: Vec<T>, f: F) -> Vec<anyhow::Result<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> anyhow::Result<R> + Sync + Send,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let run_one = |item: T| -> anyhow::Result<R> {
            catch_unwind(AssertUnwindSafe(|| f(item)))
                .unwrap_or_else(|_| Err(anyhow!("{label} worker panicked")))
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name({
                let label = label.to_string();
                move |i| format!("{label}-worker-{i}")
            })
            .build();

        debug!(label, items = items.len(), workers = self.workers, "pool start");
        match pool {
            Ok(pool) => pool.install(|| items.into_par_iter().map(run_one).collect()),
            Err(e) => {
                warn!(label, error = %e, "Could not build worker pool; running sequentially");
                items.into_iter().map(run_one).collect()
            }
        }
    }
}
