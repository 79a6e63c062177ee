//! Cache entry data model
//!
//! A [`CacheEntry`] is the unit of caching: a lookup key, a shared payload
//! handle, and the accounting fields the eviction backend works with
//! (size, weight, life, pin count, temporary flag).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, read-only handle to cached bytes or a structured record.
///
/// Consumers downcast to the concrete type their adapter stored.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Opaque handle naming one live entry.
///
/// Ids are handed out by the backend in increasing order and never reused,
/// so a stale handle can never alias a newer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a key's source identifies the cached artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Identity of an in-memory object
    Pointer,
    /// A file path
    Path,
}

/// The origin of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// Address of an in-memory source object
    Pointer(usize),
    /// Path of a file-backed source
    Path(Arc<str>),
}

impl Source {
    /// Build a pointer-identity source from any reference
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Self {
        Source::Pointer(ptr as *const () as usize)
    }

    /// Build a path source
    pub fn path(path: impl Into<Arc<str>>) -> Self {
        Source::Path(path.into())
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Pointer(_) => SourceKind::Pointer,
            Source::Path(_) => SourceKind::Path,
        }
    }
}

/// Tag separating the producers sharing one cache.
///
/// Two entries with identical keys but different data kinds never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataKind(pub u32);

impl DataKind {
    /// Decoded image buffers
    pub const IMAGE: DataKind = DataKind(1);
    /// Computed gradient ramps
    pub const GRADIENT: DataKind = DataKind(2);
}

/// Lookup key of a cache entry.
///
/// Keys compare by exact match on the source (pointer or string equality,
/// which also fixes the source kind) and both parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    /// Where the artifact came from; `None` for keys fully derived from params
    pub source: Option<Source>,
    /// First discriminator (color format, descriptor digest, ...)
    pub param1: u64,
    /// Second discriminator (frame index, output extent, ...)
    pub param2: u64,
}

impl CacheKey {
    pub fn new(source: Source, param1: u64, param2: u64) -> Self {
        Self {
            source: Some(source),
            param1,
            param2,
        }
    }

    /// Key with no source, identified by its parameters alone
    pub fn derived(param1: u64, param2: u64) -> Self {
        Self {
            source: None,
            param1,
            param2,
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_ref().map(Source::kind)
    }
}

/// Teardown hook run when an entry leaves the live set.
///
/// Each adapter implements this once. The backend calls it exactly once per
/// entry, whether the entry was invalidated explicitly, evicted, or was a
/// temporary entry destroyed on release. Implementations consult
/// [`CacheEntry::owns_payload`] and [`CacheEntry::owns_key_source`] to decide
/// what must be handed back to an external owner.
pub trait EntryTeardown: Send + Sync {
    fn on_invalidate(&self, entry: &CacheEntry);
}

/// One cached artifact and its accounting metadata.
pub struct CacheEntry {
    id: EntryId,
    key: Option<CacheKey>,
    data_kind: DataKind,
    payload: Option<Payload>,
    payload_size: usize,
    weight: u32,
    life: i64,
    usage_count: u32,
    /// Reference bit of the second-chance policy
    second_chance: bool,
    temporary: bool,
    owns_payload: bool,
    owns_key_source: bool,
    teardown: Option<Box<dyn EntryTeardown>>,
}

impl CacheEntry {
    pub(crate) fn new(id: EntryId, payload_size: usize, temporary: bool) -> Self {
        Self {
            id,
            key: None,
            data_kind: DataKind(0),
            payload: None,
            payload_size,
            weight: 1,
            life: 0,
            usage_count: 0,
            second_chance: true,
            temporary,
            owns_payload: true,
            owns_key_source: false,
            teardown: None,
        }
    }

    /// Attach key, producer tag and payload, making the entry findable.
    pub fn publish(&mut self, key: CacheKey, data_kind: DataKind, payload: Payload) {
        self.key = Some(key);
        self.data_kind = data_kind;
        self.payload = Some(payload);
    }

    /// Set the per-access aging increment (clamped to at least 1)
    pub fn set_weight(&mut self, weight: u32) {
        self.weight = weight.max(1);
    }

    pub fn set_ownership(&mut self, owns_payload: bool, owns_key_source: bool) {
        self.owns_payload = owns_payload;
        self.owns_key_source = owns_key_source;
    }

    pub fn set_teardown(&mut self, teardown: Box<dyn EntryTeardown>) {
        self.teardown = Some(teardown);
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Key of the entry, `None` until published
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn data_kind(&self) -> DataKind {
        self.data_kind
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Clone the payload as its concrete type
    pub fn payload_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone()?.downcast::<T>().ok()
    }

    /// Bytes charged against the budget
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn life(&self) -> i64 {
        self.life
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    pub fn is_pinned(&self) -> bool {
        self.usage_count > 0
    }

    pub fn has_second_chance(&self) -> bool {
        self.second_chance
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_published(&self) -> bool {
        self.key.is_some()
    }

    pub fn owns_payload(&self) -> bool {
        self.owns_payload
    }

    pub fn owns_key_source(&self) -> bool {
        self.owns_key_source
    }

    /// True if this entry can answer a lookup for `key` of `data_kind`.
    ///
    /// Temporary entries are one-shot and never match.
    pub(crate) fn matches(&self, key: &CacheKey, data_kind: DataKind) -> bool {
        !self.temporary && self.data_kind == data_kind && self.key.as_ref() == Some(key)
    }

    /// Candidate for eviction: resident, unpinned and counted in the budget
    pub(crate) fn is_evictable(&self) -> bool {
        !self.temporary && self.usage_count == 0
    }

    pub(crate) fn age(&mut self) {
        self.life = self.life.saturating_add(i64::from(self.weight));
    }

    pub(crate) fn stamp(&mut self, tick: i64) {
        self.life = self.life.max(tick);
    }

    pub(crate) fn set_second_chance(&mut self, value: bool) {
        self.second_chance = value;
    }

    pub(crate) fn pin(&mut self) {
        self.usage_count += 1;
    }

    pub(crate) fn unpin(&mut self) {
        self.usage_count -= 1;
    }

    /// Run the teardown hook and drop the record.
    ///
    /// Consuming `self` makes a second teardown impossible.
    pub(crate) fn destroy(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown.on_invalidate(&self);
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("data_kind", &self.data_kind)
            .field("payload_size", &self.payload_size)
            .field("weight", &self.weight)
            .field("life", &self.life)
            .field("usage_count", &self.usage_count)
            .field("second_chance", &self.second_chance)
            .field("temporary", &self.temporary)
            .finish_non_exhaustive()
    }
}
