use crate::{ComponentType, Error, Namespace, Partition, Result, Sctid};
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Identifies one cache: the namespace and the partition it mints for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub namespace: Namespace,
    pub partition: Partition,
}

impl CacheKey {
    pub const fn new(namespace: Namespace, partition: Partition) -> Self {
        Self {
            namespace,
            partition,
        }
    }

    pub const fn component_type(&self) -> ComponentType {
        self.partition.component_type()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.namespace, self.partition)
    }
}

/// A pool of pre-reserved identifiers for one [`CacheKey`].
///
/// Draining is exclusive: a consumer must hold the drain lock (see
/// [`IdentifierCache::try_lock`] and [`IdentifierCache::lock_within`]) to
/// take identifiers out. Top-ups never wait for the drain lock, so the pool
/// can be refilled while a consumer is draining it. The available count may
/// briefly exceed the capacity after a refill.
#[derive(Debug)]
pub struct IdentifierCache {
    key: CacheKey,
    capacity: usize,
    pool: Mutex<VecDeque<Sctid>>,
    available: AtomicUsize,
    top_up_in_progress: AtomicBool,
    drain: Semaphore,
}

impl IdentifierCache {
    pub fn new(key: CacheKey, capacity: usize) -> Self {
        Self {
            key,
            capacity,
            pool: Mutex::new(VecDeque::with_capacity(capacity)),
            available: AtomicUsize::new(0),
            top_up_in_progress: AtomicBool::new(false),
            drain: Semaphore::new(1),
        }
    }

    pub const fn key(&self) -> CacheKey {
        self.key
    }

    pub const fn namespace(&self) -> Namespace {
        self.key.namespace
    }

    pub const fn partition(&self) -> Partition {
        self.key.partition
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn identifiers_available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Appends `ids` to the pool.
    pub fn top_up(&self, ids: impl IntoIterator<Item = Sctid>) {
        let mut pool = self.pool.lock();
        pool.extend(ids);
        self.available.store(pool.len(), Ordering::Release);
    }

    /// Claims the right to refill this cache. Returns `None` if another
    /// refill is already running. The flag is cleared when the guard drops,
    /// whether the refill succeeded or not.
    pub fn begin_top_up(&self) -> Option<TopUpGuard<'_>> {
        self.top_up_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TopUpGuard { cache: self })
    }

    pub fn is_top_up_in_progress(&self) -> bool {
        self.top_up_in_progress.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.drain.available_permits() == 0
    }

    /// Takes the drain lock if it is free.
    pub fn try_lock(&self) -> Option<DrainGuard<'_>> {
        self.drain
            .try_acquire()
            .ok()
            .map(|permit| DrainGuard { cache: self, _permit: permit })
    }

    /// Waits at most `limit` for the drain lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the lock is still held when `limit`
    /// elapses.
    pub async fn lock_within(&self, limit: Duration) -> Result<DrainGuard<'_>> {
        let timed_out = || Error::LockTimeout {
            cache: self.key,
            waited: limit,
        };
        match tokio::time::timeout(limit, self.drain.acquire()).await {
            Ok(Ok(permit)) => Ok(DrainGuard { cache: self, _permit: permit }),
            // The semaphore is never closed, but a closed one is as good as
            // never acquired.
            Ok(Err(_)) | Err(_) => Err(timed_out()),
        }
    }
}

/// Exclusive access to draining an [`IdentifierCache`]. Released on drop.
#[derive(Debug)]
pub struct DrainGuard<'a> {
    cache: &'a IdentifierCache,
    _permit: SemaphorePermit<'a>,
}

impl DrainGuard<'_> {
    /// Pops one identifier, or `None` if the pool is empty.
    pub fn get_identifier(&self) -> Option<Sctid> {
        let mut pool = self.cache.pool.lock();
        let id = pool.pop_front();
        self.cache.available.store(pool.len(), Ordering::Release);
        id
    }

    /// Pops up to `quantity` identifiers in one critical section.
    pub fn take(&self, quantity: usize) -> Vec<Sctid> {
        let mut pool = self.cache.pool.lock();
        let n = quantity.min(pool.len());
        let ids: Vec<Sctid> = pool.drain(..n).collect();
        self.cache.available.store(pool.len(), Ordering::Release);
        ids
    }
}

/// Marks a refill of an [`IdentifierCache`] as in progress until dropped.
#[derive(Debug)]
pub struct TopUpGuard<'a> {
    cache: &'a IdentifierCache,
}

impl Drop for TopUpGuard<'_> {
    fn drop(&mut self) {
        self.cache.top_up_in_progress.store(false, Ordering::Release);
    }
}
