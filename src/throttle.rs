//! Shared limit on in-flight requests to the model server.
//!
//! A local Ollama instance typically serves one generation at a time, so both
//! the chat and embedding adapters draw permits from the same pool. Callers
//! beyond the limit wait for a permit to free up.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Cloneable handle to a bounded permit pool.
#[derive(Clone, Debug)]
pub struct Throttle {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Throttle {
    /// Create a pool admitting `capacity` concurrent requests (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit. The request slot is released when the permit drops.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        if self.permits.available_permits() == 0 {
            tracing::debug!(capacity = self.capacity, "Model server busy, queueing request");
        }
        // The semaphore is never closed, so acquisition cannot fail.
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("throttle semaphore closed"),
        }
    }

    /// Maximum concurrent requests.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
