//! Bounded-parallelism drain of a shared id queue.
//!
//! Workers pop ids until the queue is empty or the abort flag is raised. The
//! flag is only checked between items, so an id that has been popped always
//! runs to completion. Failed items are logged and left out of the result.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::domain::EntityId;

const FALLBACK_PARALLELISM: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    pub stride: usize,
}

impl PoolOptions {
    pub fn new(workers: usize, stride: usize) -> Self {
        Self {
            workers: workers.max(1),
            stride: stride.max(1),
        }
    }
}

/// `min(cap, 2 * available parallelism)`.
pub fn worker_count(cap: usize) -> usize {
    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_PARALLELISM);
    cap.min(parallelism * 2).max(1)
}

pub fn drain<V, E, F, P>(
    queue: Vec<EntityId>,
    options: PoolOptions,
    abort: &AtomicBool,
    op: F,
    on_progress: P,
) -> BTreeMap<EntityId, V>
where
    V: Send,
    E: Display,
    F: Fn(EntityId) -> Result<V, E> + Sync,
    P: Fn(usize) + Sync,
{
    if queue.is_empty() {
        return BTreeMap::new();
    }
    let workers = options.workers.min(queue.len()).max(1);
    let stride = options.stride.max(1);
    let queue = Mutex::new(VecDeque::from(queue));
    let completed = AtomicUsize::new(0);

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(|| {
                let mut resolved = Vec::new();
                loop {
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut pending) => pending.pop_front(),
                        Err(_) => None,
                    };
                    let Some(id) = next else {
                        break;
                    };
                    match op(id) {
                        Ok(value) => resolved.push((id, value)),
                        Err(err) => tracing::debug!(%id, error = %err, "item unresolved"),
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % stride == 0 {
                        on_progress(done);
                    }
                }
                resolved
            }));
        }

        let mut results = BTreeMap::new();
        for handle in handles {
            match handle.join() {
                Ok(resolved) => results.extend(resolved),
                Err(_) => tracing::warn!("pool worker panicked, its results are lost"),
            }
        }
        results
    })
}
