//! Calculation Pool - admission control for outstanding computations.
//!
//! A pool hands out at most `capacity` slots at a time. Requests made while
//! the pool is saturated queue in FIFO order and are granted as slots are
//! released. A [`Slot`] releases itself when dropped, so every exit path of
//! the holder gives the slot back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Name of the pool used when a job does not select one.
pub const DEFAULT_POOL_NAME: &str = "default";

/// Counting gate bounding how many computations may be outstanding.
///
/// Cloning a pool yields another handle onto the same counters.
#[derive(Debug, Clone)]
pub struct CalculationPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    name: String,
    capacity: usize,
    // tokio's semaphore is fair: queued acquisitions are served in order.
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    peak_active: AtomicUsize,
}

impl CalculationPool {
    /// Create a pool. A capacity of zero is raised to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let name = name.into();
        debug!(pool = %name, capacity, "Created calculation pool");
        Self {
            inner: Arc::new(PoolInner {
                name,
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                waiting: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Maximum number of simultaneously held slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.inner.capacity - self.inner.semaphore.available_permits()
    }

    /// Number of requests queued for a slot.
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Highest `active` value observed since the pool was created.
    pub fn peak_active(&self) -> usize {
        self.inner.peak_active.load(Ordering::SeqCst)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Request a slot, suspending while the pool is saturated.
    ///
    /// Fails only if the pool is closed before the slot is granted.
    pub async fn request_slot(&self) -> Result<Slot> {
        if let Some(slot) = self.try_request_slot() {
            return Ok(slot);
        }
        if self.is_closed() {
            return Err(Error::PoolClosed(self.inner.name.clone()));
        }

        let _queued = QueuedGuard::enter(&self.inner.waiting);
        trace!(pool = %self.inner.name, waiting = self.waiting(), "Pool saturated, queueing");

        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed(self.inner.name.clone()))?;
        Ok(self.grant(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_request_slot(&self) -> Option<Slot> {
        Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.grant(permit))
    }

    /// Close the pool. Queued and future requests fail with
    /// [`Error::PoolClosed`]; slots already held stay valid until released.
    pub fn close(&self) {
        if !self.is_closed() {
            debug!(pool = %self.inner.name, waiting = self.waiting(), "Closing calculation pool");
            self.inner.semaphore.close();
        }
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.inner.name.clone(),
            capacity: self.inner.capacity,
            active: self.active(),
            waiting: self.waiting(),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> Slot {
        let active = self.active();
        self.inner.peak_active.fetch_max(active, Ordering::SeqCst);
        trace!(pool = %self.inner.name, active, "Granted slot");
        Slot {
            _permit: permit,
            pool: self.inner.name.clone(),
        }
    }
}

/// A held pool slot. Released by [`release`](Self::release) or on drop.
#[derive(Debug)]
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    pool: String,
}

impl Slot {
    /// Name of the pool this slot belongs to.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Give the slot back, granting it to the next queued request if any.
    pub fn release(self) {
        trace!(pool = %self.pool, "Released slot");
    }
}

/// Pool counters for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub capacity: usize,
    pub active: usize,
    pub waiting: usize,
}

/// Keeps `waiting` accurate even if the requesting future is dropped.
struct QueuedGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
