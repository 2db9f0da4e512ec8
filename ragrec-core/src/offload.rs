//! Bounded offload pool for blocking work.
//!
//! Synchronous clients (a local embedding model, a blocking SDK) are run on
//! tokio's blocking threads so they can be awaited next to natively async calls.
//! A semaphore caps how many blocking items run at once.

use crate::error::OffloadError;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs blocking closures on the blocking thread pool and hands back a future.
#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl BlockingPool {
    /// Create a pool that allows at most `capacity` items to run at once.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a running item.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` on a blocking thread once a permit is free.
    pub async fn run<F, T>(&self, work: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OffloadError::Closed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| OffloadError::Join {
            message: e.to_string(),
        })
    }

    /// Stop accepting work. Items already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}
