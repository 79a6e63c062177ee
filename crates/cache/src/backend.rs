//! Eviction backend
//!
//! The backend owns every live [`CacheEntry`] and enforces the byte budget.
//! Entries live in an insertion-ordered list and every primitive is a linear
//! scan; entry counts in this domain are bounded by memory, not by count, and
//! stay in the tens.
//!
//! # Eviction
//!
//! When a reservation does not fit, the backend repeatedly removes a victim
//! chosen by the [`EvictionPolicy`] until it does. If every resident entry
//! is pinned the reservation degrades to a *temporary* entry: it is served
//! once, never counted against the budget, and destroyed on its first
//! release.
//!
//! - [`EvictionPolicy::WeightedLife`]: every `acquire` ages *all* resident
//!   entries by their own weight, so `life` approximates the weighted cache
//!   traffic an entry has survived rather than how recently it was used. The
//!   victim is the unpinned entry with the smallest `life`, oldest inserted
//!   first on ties.
//! - [`EvictionPolicy::LeastRecentlyUsed`]: every `acquire` stamps only the
//!   accessed entry with a monotonically increasing access clock, and the
//!   smallest stamp loses.
//! - [`EvictionPolicy::SecondChance`]: entries carry a reference bit, set
//!   when they are reserved and whenever `find` hits them. The victim scan
//!   walks the list in insertion order, clearing set bits as it passes, and
//!   takes the first unpinned entry whose bit is already clear. A second
//!   pass covers the case where the first one only cleared bits.

use tracing::{debug, trace, warn};

use crate::entry::{CacheEntry, CacheKey, DataKind, EntryId, Payload, Source};
use crate::error::{CacheError, CacheResult};
use crate::stats::CacheStats;

/// How entries accumulate `life` on access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Every access ages every resident entry by its weight
    #[default]
    WeightedLife,
    /// Every access stamps the accessed entry with the current access clock
    LeastRecentlyUsed,
    /// Clock-style reference bit, refreshed by lookups
    SecondChance,
}

impl EvictionPolicy {
    /// Parse the short names used in configuration (`life`, `lru`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "life" | "weighted" | "weighted_life" => Some(EvictionPolicy::WeightedLife),
            "lru" | "least_recently_used" => Some(EvictionPolicy::LeastRecentlyUsed),
            "sc" | "second_chance" => Some(EvictionPolicy::SecondChance),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::WeightedLife => "life",
            EvictionPolicy::LeastRecentlyUsed => "lru",
            EvictionPolicy::SecondChance => "sc",
        }
    }
}

/// Operations a cache backend provides to the manager.
///
/// The manager only ever talks to a `Box<dyn CacheBackend>`, so a different
/// storage or policy engine can be installed without touching the adapters.
/// All methods are called with the manager lock held.
pub trait CacheBackend: Send {
    /// Reserve a new entry able to hold `size` bytes of budget, evicting
    /// other entries if needed. The entry is unpublished until the caller
    /// fills it through [`CacheBackend::entry_mut`].
    fn reserve(&mut self, size: usize) -> CacheResult<EntryId>;

    /// First published, non-temporary entry matching `key` and `data_kind`.
    ///
    /// Counts as a hit or miss in [`CacheStats`].
    fn find(&mut self, key: &CacheKey, data_kind: DataKind) -> Option<EntryId>;

    /// Same match as [`CacheBackend::find`], without touching statistics or
    /// policy state. For re-checks of a lookup that was already counted.
    fn lookup(&self, key: &CacheKey, data_kind: DataKind) -> Option<EntryId> {
        self.entries()
            .find(|entry| entry.matches(key, data_kind))
            .map(CacheEntry::id)
    }

    /// Pin the entry and return its payload
    fn acquire(&mut self, id: EntryId) -> CacheResult<Option<Payload>>;

    /// Drop one pin; temporary entries are destroyed
    fn release(&mut self, id: EntryId) -> CacheResult<()>;

    /// Remove the entry from the live set and run its teardown
    fn invalidate(&mut self, id: EntryId) -> CacheResult<()>;

    /// Change the budget, evicting unpinned entries until it is met.
    ///
    /// Returns `false` if pinned entries kept usage above the new budget.
    fn resize(&mut self, new_max_size: usize) -> bool;

    fn entry(&self, id: EntryId) -> Option<&CacheEntry>;

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry>;

    fn entries(&self) -> Box<dyn Iterator<Item = &CacheEntry> + '_>;

    fn max_size(&self) -> usize;

    fn used(&self) -> usize;

    fn stats(&self) -> CacheStats;

    /// Invalidate every unpinned entry whose source matches, or every
    /// unpinned entry when `source` is `None`. Returns how many were removed.
    fn drop_source(&mut self, source: Option<&Source>) -> usize {
        let victims: Vec<EntryId> = self
            .entries()
            .filter(|entry| entry.is_evictable())
            .filter(|entry| match source {
                Some(source) => entry
                    .key()
                    .and_then(|key| key.source.as_ref())
                    .is_some_and(|s| s == source),
                None => true,
            })
            .map(CacheEntry::id)
            .collect();

        victims
            .into_iter()
            .filter(|id| self.invalidate(*id).is_ok())
            .count()
    }
}

/// The shipped backend: linear entry list with life-based eviction.
#[derive(Debug)]
pub struct EvictionBackend {
    entries: Vec<CacheEntry>,
    policy: EvictionPolicy,
    max_size: usize,
    used: usize,
    next_id: u64,
    clock: i64,
    hits: u64,
    misses: u64,
    evictions: u64,
    temporaries: u64,
}

impl EvictionBackend {
    /// Create a backend with the default [`EvictionPolicy::WeightedLife`]
    pub fn new(max_size: usize) -> Self {
        Self::with_policy(max_size, EvictionPolicy::default())
    }

    pub fn with_policy(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
            max_size,
            used: 0,
            next_id: 1,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            temporaries: 0,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn position(&self, id: EntryId) -> CacheResult<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id() == id)
            .ok_or(CacheError::UnknownEntry(id))
    }

    fn select_victim(&mut self) -> Option<usize> {
        match self.policy {
            EvictionPolicy::WeightedLife | EvictionPolicy::LeastRecentlyUsed => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.is_evictable())
                .min_by_key(|(_, entry)| entry.life())
                .map(|(index, _)| index),
            EvictionPolicy::SecondChance => self.second_chance_victim(),
        }
    }

    /// Two sweeps: the first may do nothing but clear reference bits, and
    /// pinned entries can hide every cleared one, so a single sweep is not
    /// enough to decide there is no victim.
    fn second_chance_victim(&mut self) -> Option<usize> {
        for _ in 0..2 {
            for (index, entry) in self.entries.iter_mut().enumerate() {
                if entry.is_temporary() {
                    continue;
                }
                if entry.has_second_chance() {
                    entry.set_second_chance(false);
                    continue;
                }
                if !entry.is_pinned() {
                    return Some(index);
                }
                trace!(id = %entry.id(), "second-chance victim still in use");
            }
        }
        None
    }

    /// Take the entry out of the live set, settling the budget
    fn remove_at(&mut self, index: usize) -> CacheEntry {
        let entry = self.entries.remove(index);
        if !entry.is_temporary() {
            self.used = self.used.saturating_sub(entry.payload_size());
        }
        entry
    }

    fn evict_one(&mut self) -> bool {
        let Some(index) = self.select_victim() else {
            return false;
        };
        let victim = self.remove_at(index);
        self.evictions += 1;
        debug!(
            id = %victim.id(),
            size = victim.payload_size(),
            life = victim.life(),
            used = self.used,
            "evicted cache entry"
        );
        victim.destroy();
        true
    }
}

impl CacheBackend for EvictionBackend {
    fn reserve(&mut self, size: usize) -> CacheResult<EntryId> {
        if self.entries.try_reserve(1).is_err() {
            warn!(size, "cache entry allocation failed");
            return Err(CacheError::AllocationFailed { size });
        }

        let temporary = if size > self.max_size {
            true
        } else {
            loop {
                if self.used.saturating_add(size) <= self.max_size {
                    break false;
                }
                if !self.evict_one() {
                    break true;
                }
            }
        };

        if temporary {
            self.temporaries += 1;
            debug!(size, max_size = self.max_size, "serving entry without caching");
        } else {
            self.used += size;
        }

        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        self.entries.push(CacheEntry::new(id, size, temporary));
        Ok(id)
    }

    fn find(&mut self, key: &CacheKey, data_kind: DataKind) -> Option<EntryId> {
        let found = self
            .entries
            .iter_mut()
            .find(|entry| entry.matches(key, data_kind));

        match found {
            Some(entry) => {
                entry.set_second_chance(true);
                self.hits += 1;
                trace!(id = %entry.id(), "cache hit");
                Some(entry.id())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn acquire(&mut self, id: EntryId) -> CacheResult<Option<Payload>> {
        let index = self.position(id)?;

        match self.policy {
            EvictionPolicy::WeightedLife => {
                for entry in &mut self.entries {
                    entry.age();
                }
            }
            EvictionPolicy::LeastRecentlyUsed => {
                self.clock += 1;
                self.entries[index].stamp(self.clock);
            }
            EvictionPolicy::SecondChance => {}
        }

        let entry = &mut self.entries[index];
        entry.pin();
        Ok(entry.payload().cloned())
    }

    fn release(&mut self, id: EntryId) -> CacheResult<()> {
        let index = self.position(id)?;
        if self.entries[index].is_temporary() {
            self.remove_at(index).destroy();
            return Ok(());
        }

        let entry = &mut self.entries[index];
        if entry.usage_count() == 0 {
            warn!(id = %id, "released cache entry that is not in use");
            return Err(CacheError::NotPinned(id));
        }

        entry.unpin();
        Ok(())
    }

    fn invalidate(&mut self, id: EntryId) -> CacheResult<()> {
        let index = self.position(id)?;
        self.remove_at(index).destroy();
        Ok(())
    }

    fn resize(&mut self, new_max_size: usize) -> bool {
        self.max_size = new_max_size;
        while self.used > self.max_size {
            if !self.evict_one() {
                debug!(
                    used = self.used,
                    max_size = self.max_size,
                    "budget over-subscribed by pinned entries"
                );
                return false;
            }
        }
        true
    }

    fn entry(&self, id: EntryId) -> Option<&CacheEntry> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = &CacheEntry> + '_> {
        Box::new(self.entries.iter())
    }

    fn max_size(&self) -> usize {
        self.max_size
    }

    fn used(&self) -> usize {
        self.used
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            temporary_count: self.entries.iter().filter(|e| e.is_temporary()).count(),
            used: self.used,
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            temporaries: self.temporaries,
        }
    }
}

impl Drop for EvictionBackend {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            entry.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryTeardown;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Records every teardown by entry id
    #[derive(Clone, Default)]
    struct Teardowns(Arc<Mutex<HashMap<EntryId, usize>>>);

    impl Teardowns {
        fn count(&self, id: EntryId) -> usize {
            self.0.lock().unwrap().get(&id).copied().unwrap_or(0)
        }

        fn total(&self) -> usize {
            self.0.lock().unwrap().values().sum()
        }
    }

    impl EntryTeardown for Teardowns {
        fn on_invalidate(&self, entry: &CacheEntry) {
            *self.0.lock().unwrap().entry(entry.id()).or_insert(0) += 1;
        }
    }

    fn insert(
        backend: &mut EvictionBackend,
        name: u64,
        size: usize,
        teardowns: &Teardowns,
    ) -> EntryId {
        let id = backend.reserve(size).unwrap();
        let entry = backend.entry_mut(id).unwrap();
        entry.publish(CacheKey::derived(name, 0), DataKind::IMAGE, Arc::new(name));
        entry.set_teardown(Box::new(teardowns.clone()));
        id
    }

    fn budgeted_sum(backend: &EvictionBackend) -> usize {
        backend
            .entries()
            .filter(|e| !e.is_temporary())
            .map(|e| e.payload_size())
            .sum()
    }

    #[test]
    fn test_insert_evicts_only_victim() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);

        let a = insert(&mut backend, 1, 600, &teardowns);
        let b = insert(&mut backend, 2, 600, &teardowns);

        assert!(backend.entry(a).is_none());
        assert!(!backend.entry(b).unwrap().is_temporary());
        assert_eq!(backend.used(), 600);
        assert_eq!(teardowns.count(a), 1);
        assert_eq!(backend.stats().evictions, 1);
    }

    #[test]
    fn test_pinned_entry_forces_temporary() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);

        let a = insert(&mut backend, 1, 600, &teardowns);
        backend.acquire(a).unwrap();
        let b = insert(&mut backend, 2, 600, &teardowns);

        assert!(backend.entry(a).is_some());
        assert!(backend.entry(b).unwrap().is_temporary());
        assert_eq!(backend.used(), 600);
        assert_eq!(teardowns.total(), 0);
    }

    #[test]
    fn test_duplicate_keys_find_first_inserted() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(2000);

        let first = insert(&mut backend, 7, 500, &teardowns);
        let second = insert(&mut backend, 7, 500, &teardowns);
        assert_ne!(first, second);

        let key = CacheKey::derived(7, 0);
        assert_eq!(backend.find(&key, DataKind::IMAGE), Some(first));
        assert_eq!(backend.find(&key, DataKind::IMAGE), Some(first));

        backend.invalidate(first).unwrap();
        assert_eq!(backend.find(&key, DataKind::IMAGE), Some(second));
    }

    #[test]
    fn test_resize_spares_pinned() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);

        let pinned = insert(&mut backend, 1, 100, &teardowns);
        let loose = insert(&mut backend, 2, 100, &teardowns);
        backend.acquire(pinned).unwrap();

        assert!(!backend.resize(0));
        assert!(backend.entry(pinned).is_some());
        assert!(backend.entry(loose).is_none());
        assert_eq!(backend.used(), 100);
        assert_eq!(backend.max_size(), 0);
    }

    #[test]
    fn test_resize_satisfied() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);
        insert(&mut backend, 1, 300, &teardowns);
        insert(&mut backend, 2, 300, &teardowns);
        insert(&mut backend, 3, 300, &teardowns);

        assert!(backend.resize(600));
        assert_eq!(backend.used(), 600);
        assert_eq!(backend.stats().entry_count, 2);
    }

    #[test]
    fn test_oversized_entry_does_not_touch_budget() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);
        let small = insert(&mut backend, 1, 400, &teardowns);

        let big = insert(&mut backend, 2, 5000, &teardowns);
        assert!(backend.entry(big).unwrap().is_temporary());
        assert_eq!(backend.used(), 400);
        // Nothing evicted for an entry that could never fit
        assert!(backend.entry(small).is_some());

        backend.acquire(big).unwrap();
        backend.release(big).unwrap();
        assert!(backend.entry(big).is_none());
        assert_eq!(backend.used(), 400);
        assert_eq!(teardowns.count(big), 1);
    }

    #[test]
    fn test_invalidating_temporary_keeps_used() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        insert(&mut backend, 1, 80, &teardowns);
        let temp = insert(&mut backend, 2, 500, &teardowns);

        backend.invalidate(temp).unwrap();
        assert_eq!(backend.used(), 80);
    }

    #[test]
    fn test_temporary_entries_are_not_findable() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(10);
        insert(&mut backend, 1, 50, &teardowns);
        assert!(backend.find(&CacheKey::derived(1, 0), DataKind::IMAGE).is_none());
    }

    #[test]
    fn test_weighted_aging_is_global() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);
        let a = insert(&mut backend, 1, 10, &teardowns);
        let b = insert(&mut backend, 2, 10, &teardowns);
        backend.entry_mut(b).unwrap().set_weight(3);

        backend.acquire(a).unwrap();
        backend.acquire(a).unwrap();

        assert_eq!(backend.entry(a).unwrap().life(), 2);
        assert_eq!(backend.entry(b).unwrap().life(), 6);
        assert_eq!(backend.entry(b).unwrap().usage_count(), 0);
    }

    #[test]
    fn test_earlier_entries_outlive_later_ones() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(300);
        let a = insert(&mut backend, 1, 100, &teardowns);
        backend.acquire(a).unwrap();
        backend.release(a).unwrap();
        let b = insert(&mut backend, 2, 100, &teardowns);
        backend.acquire(b).unwrap();
        backend.release(b).unwrap();
        let c = insert(&mut backend, 3, 100, &teardowns);

        // c has never been aged, so it is the smallest-life victim
        insert(&mut backend, 4, 100, &teardowns);
        assert!(backend.entry(a).is_some());
        assert!(backend.entry(b).is_some());
        assert!(backend.entry(c).is_none());
    }

    #[test]
    fn test_lru_policy_stamps_accessed_entry() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::with_policy(200, EvictionPolicy::LeastRecentlyUsed);
        let a = insert(&mut backend, 1, 100, &teardowns);
        let b = insert(&mut backend, 2, 100, &teardowns);

        backend.acquire(b).unwrap();
        backend.release(b).unwrap();
        backend.acquire(a).unwrap();
        backend.release(a).unwrap();
        assert_eq!(backend.entry(b).unwrap().life(), 1);
        assert_eq!(backend.entry(a).unwrap().life(), 2);

        insert(&mut backend, 3, 100, &teardowns);
        assert!(backend.entry(a).is_some());
        assert!(backend.entry(b).is_none());
    }

    #[test]
    fn test_acquire_release_pairing() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        let a = insert(&mut backend, 1, 100, &teardowns);

        for _ in 0..3 {
            backend.acquire(a).unwrap();
        }
        for remaining in (0..3).rev() {
            // Still pinned: a competing reservation must degrade
            let competitor = backend.reserve(100).unwrap();
            assert!(backend.entry(competitor).unwrap().is_temporary());
            backend.invalidate(competitor).unwrap();

            backend.release(a).unwrap();
            assert_eq!(backend.entry(a).unwrap().usage_count(), remaining);
        }

        let next = backend.reserve(100).unwrap();
        assert!(!backend.entry(next).unwrap().is_temporary());
        assert!(backend.entry(a).is_none());
    }

    #[test]
    fn test_release_without_acquire_is_rejected() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        let a = insert(&mut backend, 1, 10, &teardowns);

        assert_eq!(backend.release(a), Err(CacheError::NotPinned(a)));
        assert_eq!(backend.entry(a).unwrap().usage_count(), 0);
        assert_eq!(backend.used(), 10);
    }

    #[test]
    fn test_unknown_entry() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        let a = insert(&mut backend, 1, 10, &teardowns);
        backend.invalidate(a).unwrap();

        assert_eq!(backend.invalidate(a), Err(CacheError::UnknownEntry(a)));
        assert!(matches!(backend.acquire(a), Err(CacheError::UnknownEntry(_))));
        assert_eq!(teardowns.count(a), 1);
    }

    #[test]
    fn test_drop_source_skips_pinned() {
        let mut backend = EvictionBackend::new(1000);
        let reserve_with_source = |backend: &mut EvictionBackend, path: &str, frame: u64| {
            let id = backend.reserve(10).unwrap();
            backend.entry_mut(id).unwrap().publish(
                CacheKey::new(Source::path(path), 0, frame),
                DataKind::IMAGE,
                Arc::new(()),
            );
            id
        };

        let a0 = reserve_with_source(&mut backend, "a.png", 0);
        let a1 = reserve_with_source(&mut backend, "a.png", 1);
        let b0 = reserve_with_source(&mut backend, "b.png", 0);
        backend.acquire(a1).unwrap();

        assert_eq!(backend.drop_source(Some(&Source::path("a.png"))), 1);
        assert!(backend.entry(a0).is_none());
        assert!(backend.entry(a1).is_some());
        assert!(backend.entry(b0).is_some());

        assert_eq!(backend.drop_source(None), 1);
        assert!(backend.entry(b0).is_none());
        assert_eq!(backend.used(), 10);
    }

    #[test]
    fn test_find_counts_hits_and_misses() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        insert(&mut backend, 1, 10, &teardowns);

        assert!(backend.find(&CacheKey::derived(1, 0), DataKind::IMAGE).is_some());
        assert!(backend.find(&CacheKey::derived(2, 0), DataKind::IMAGE).is_none());
        assert!(backend.find(&CacheKey::derived(1, 0), DataKind::GRADIENT).is_none());

        let stats = backend.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_lookup_does_not_count() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(100);
        let a = insert(&mut backend, 1, 10, &teardowns);

        assert_eq!(backend.lookup(&CacheKey::derived(1, 0), DataKind::IMAGE), Some(a));
        assert_eq!(backend.lookup(&CacheKey::derived(2, 0), DataKind::IMAGE), None);

        let stats = backend.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_second_chance_sweeps_twice() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::with_policy(300, EvictionPolicy::SecondChance);
        let a = insert(&mut backend, 1, 100, &teardowns);
        let b = insert(&mut backend, 2, 100, &teardowns);
        let c = insert(&mut backend, 3, 100, &teardowns);

        // Every bit is set: the first sweep clears them, the second takes a
        let d = insert(&mut backend, 4, 100, &teardowns);
        assert!(backend.entry(a).is_none());
        assert!(!backend.entry(b).unwrap().has_second_chance());
        assert!(!backend.entry(c).unwrap().has_second_chance());
        assert!(backend.entry(d).unwrap().has_second_chance());

        // A hit on b earns it another round, so c goes next
        assert_eq!(backend.find(&CacheKey::derived(2, 0), DataKind::IMAGE), Some(b));
        insert(&mut backend, 5, 100, &teardowns);
        assert!(backend.entry(b).is_some());
        assert!(backend.entry(c).is_none());
        assert!(!backend.entry(b).unwrap().has_second_chance());
        assert_eq!(backend.stats().evictions, 2);
    }

    #[test]
    fn test_second_chance_skips_pinned() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::with_policy(200, EvictionPolicy::SecondChance);
        let a = insert(&mut backend, 1, 100, &teardowns);
        let b = insert(&mut backend, 2, 100, &teardowns);
        backend.acquire(a).unwrap();

        let c = insert(&mut backend, 3, 100, &teardowns);
        assert!(backend.entry(a).is_some());
        assert!(backend.entry(b).is_none());
        assert!(!backend.entry(c).unwrap().is_temporary());

        // Only pinned entries left to sweep: degrade to temporary
        backend.acquire(c).unwrap();
        let d = insert(&mut backend, 4, 100, &teardowns);
        assert!(backend.entry(d).unwrap().is_temporary());
        assert_eq!(backend.used(), 200);
        assert_eq!(teardowns.count(b), 1);
    }

    #[test]
    fn test_policy_names() {
        for policy in [
            EvictionPolicy::WeightedLife,
            EvictionPolicy::LeastRecentlyUsed,
            EvictionPolicy::SecondChance,
        ] {
            assert_eq!(EvictionPolicy::from_name(policy.name()), Some(policy));
        }
        assert_eq!(
            EvictionPolicy::from_name("Second_Chance"),
            Some(EvictionPolicy::SecondChance)
        );
        assert_eq!(EvictionPolicy::from_name("fifo"), None);
    }

    #[test]
    fn test_drop_tears_down_remaining_entries() {
        let teardowns = Teardowns::default();
        let mut backend = EvictionBackend::new(1000);
        insert(&mut backend, 1, 10, &teardowns);
        insert(&mut backend, 2, 10, &teardowns);
        drop(backend);
        assert_eq!(teardowns.total(), 2);
    }

    #[test]
    fn test_random_workload_invariants() {
        for policy in [
            EvictionPolicy::WeightedLife,
            EvictionPolicy::LeastRecentlyUsed,
            EvictionPolicy::SecondChance,
        ] {
            run_random_workload(policy);
        }
    }

    fn run_random_workload(policy: EvictionPolicy) {
        let teardowns = Teardowns::default();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut backend = EvictionBackend::with_policy(4096, policy);
        let mut pins: Vec<EntryId> = Vec::new();
        let mut created: Vec<EntryId> = Vec::new();

        for step in 0..2000u64 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let size = rng.gen_range(1..1500);
                    let id = insert(&mut backend, step, size, &teardowns);
                    created.push(id);
                    if !backend.entry(id).unwrap().is_temporary() {
                        assert!(backend.used() <= backend.max_size());
                    }
                }
                5..=6 => {
                    let live: Vec<EntryId> = backend.entries().map(|e| e.id()).collect();
                    if !live.is_empty() {
                        let id = live[rng.gen_range(0..live.len())];
                        backend.acquire(id).unwrap();
                        pins.push(id);
                    }
                }
                7..=8 => {
                    if !pins.is_empty() {
                        let id = pins.swap_remove(rng.gen_range(0..pins.len()));
                        backend.release(id).unwrap();
                        // A temporary entry is destroyed by its first release
                        pins.retain(|pinned| backend.entry(*pinned).is_some());
                    }
                }
                _ => {
                    let new_max = rng.gen_range(1024..8192);
                    if backend.resize(new_max) {
                        assert!(backend.used() <= new_max);
                    }
                }
            }

            assert_eq!(budgeted_sum(&backend), backend.used());
            for pinned in &pins {
                assert!(backend.entry(*pinned).is_some(), "pinned entry evicted");
            }
        }

        drop(backend);
        for id in created {
            assert_eq!(teardowns.count(id), 1, "teardown count for {id}");
        }
    }
}
