//! Error types shared by the cache backend and its adapters.

use crate::entry::EntryId;

/// Errors returned by cache operations.
///
/// None of these leave the cache in an inconsistent state: a failed
/// operation is a no-op on accounting and on the live entry set.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    /// The entry record for a reservation could not be allocated
    #[error("failed to allocate cache entry for {size} bytes")]
    AllocationFailed { size: usize },

    /// The handle does not name a live entry
    #[error("cache entry {0} is not live")]
    UnknownEntry(EntryId),

    /// Released an entry that has no outstanding pins
    #[error("cache entry {0} released without a matching acquire")]
    NotPinned(EntryId),

    /// The producer (decoder, ramp computation) failed before insertion
    #[error("producer failed: {0}")]
    Producer(String),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
