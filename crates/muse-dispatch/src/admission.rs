use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{DispatchError, Result};

/// Fixed pool of admission slots
///
/// At most `capacity` slots are out at any time; [`acquire`](Self::acquire)
/// waits for one to be returned.
#[derive(Debug, Clone)]
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of processing capacity, returned to the pool on drop
///
/// Dropping happens on every exit path, including unwinding, so a slot can
/// never leak out of a finished task.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPool {
    /// Create a pool with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<AdmissionSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed)?;

        Ok(AdmissionSlot { _permit: permit })
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> Result<Option<AdmissionSlot>> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(AdmissionSlot { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(DispatchError::Closed),
        }
    }

    /// Slots currently handed out
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further acquisitions; waiting callers get [`DispatchError::Closed`]
    pub fn close(&self) {
        self.semaphore.close();
    }
}
