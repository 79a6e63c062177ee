//! Cache manager facade
//!
//! [`CacheManager`] is the single front door shared by every adapter. It owns
//! one coarse lock around a pluggable [`CacheBackend`]. Cache operations are
//! only reachable through the [`CacheGuard`] returned by
//! [`CacheManager::lock`], so a "find, and if absent reserve and publish"
//! sequence runs inside one critical section and two callers that miss on the
//! same key cannot both insert it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use draw_cache::{CacheKey, CacheManager, DataKind};
//!
//! let manager = CacheManager::new(1024);
//! let key = CacheKey::derived(42, 0);
//!
//! let mut cache = manager.lock();
//! let id = match cache.find(&key, DataKind::IMAGE) {
//!     Some(id) => id,
//!     None => {
//!         let id = cache.reserve(16).unwrap();
//!         let entry = cache.entry_mut(id).unwrap();
//!         entry.publish(key.clone(), DataKind::IMAGE, Arc::new([0u8; 16]));
//!         id
//!     }
//! };
//! let payload = cache.acquire(id).unwrap();
//! assert!(payload.is_some());
//! cache.release(id).unwrap();
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::backend::{CacheBackend, EvictionBackend};
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheKey, DataKind, EntryId, Payload, Source};
use crate::error::CacheResult;
use crate::stats::CacheStats;

/// Shared handle to one cache instance.
///
/// Cloning is cheap and every clone refers to the same backend and lock.
#[derive(Clone)]
pub struct CacheManager {
    backend: Arc<Mutex<Box<dyn CacheBackend>>>,
}

impl CacheManager {
    /// Create a manager over the default [`EvictionBackend`]
    ///
    /// # Arguments
    ///
    /// * `max_size` - Budget in bytes for non-temporary entries
    pub fn new(max_size: usize) -> Self {
        Self::with_backend(Box::new(EvictionBackend::new(max_size)))
    }

    /// Create a manager from a configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_backend(Box::new(EvictionBackend::with_policy(
            config.max_size,
            config.eviction_policy,
        )))
    }

    /// Create a manager over any backend implementation
    pub fn with_backend(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Enter the critical section, blocking until the lock is free.
    ///
    /// The lock is held until the guard is dropped or passed to
    /// [`CacheManager::unlock`].
    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            backend: self.backend.lock(),
        }
    }

    /// Enter the critical section only if nobody else holds it
    pub fn try_lock(&self) -> Option<CacheGuard<'_>> {
        self.backend
            .try_lock()
            .map(|backend| CacheGuard { backend })
    }

    /// Leave the critical section
    pub fn unlock(guard: CacheGuard<'_>) {
        drop(guard);
    }

    /// Change the budget, evicting unpinned entries as needed.
    ///
    /// Returns `false` if pinned entries keep usage above the new budget.
    pub fn set_max_size(&self, max_size: usize) -> bool {
        self.lock().resize(max_size)
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size()
    }

    pub fn used(&self) -> usize {
        self.lock().used()
    }

    /// Invalidate every unpinned entry from `source`, or every unpinned entry
    pub fn drop_source(&self, source: Option<&Source>) -> usize {
        self.lock().drop_source(source)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }
}

impl Default for CacheManager {
    /// Create a manager from [`CacheConfig::default`]
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager").finish_non_exhaustive()
    }
}

/// Proof that the cache lock is held.
///
/// Every backend operation is forwarded through the guard; dropping it
/// releases the lock.
pub struct CacheGuard<'a> {
    backend: MutexGuard<'a, Box<dyn CacheBackend>>,
}

impl CacheGuard<'_> {
    /// Reserve a new entry for `size` bytes (see [`CacheBackend::reserve`])
    pub fn reserve(&mut self, size: usize) -> CacheResult<EntryId> {
        self.backend.reserve(size)
    }

    pub fn find(&mut self, key: &CacheKey, data_kind: DataKind) -> Option<EntryId> {
        self.backend.find(key, data_kind)
    }

    /// Re-check for `key` without counting a hit or miss
    pub fn lookup(&self, key: &CacheKey, data_kind: DataKind) -> Option<EntryId> {
        self.backend.lookup(key, data_kind)
    }

    pub fn acquire(&mut self, id: EntryId) -> CacheResult<Option<Payload>> {
        self.backend.acquire(id)
    }

    pub fn release(&mut self, id: EntryId) -> CacheResult<()> {
        self.backend.release(id)
    }

    pub fn invalidate(&mut self, id: EntryId) -> CacheResult<()> {
        self.backend.invalidate(id)
    }

    pub fn resize(&mut self, new_max_size: usize) -> bool {
        let satisfied = self.backend.resize(new_max_size);
        debug!(new_max_size, satisfied, "resized cache budget");
        satisfied
    }

    pub fn entry(&self, id: EntryId) -> Option<&CacheEntry> {
        self.backend.entry(id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.backend.entry_mut(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> + '_ {
        self.backend.entries()
    }

    pub fn drop_source(&mut self, source: Option<&Source>) -> usize {
        let dropped = self.backend.drop_source(source);
        debug!(dropped, "dropped cache entries by source");
        dropped
    }

    pub fn max_size(&self) -> usize {
        self.backend.max_size()
    }

    pub fn used(&self) -> usize {
        self.backend.used()
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }
}
