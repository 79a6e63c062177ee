//! Draw Cache Library
//!
//! Size-budgeted memoization of decoded images and gradient ramps for a
//! graphics runtime. Entries in use are pinned and never evicted; artifacts
//! larger than the whole budget are served once without being cached.

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod gradient;
pub mod image;
pub mod manager;
pub mod stats;

pub use backend::{CacheBackend, EvictionBackend, EvictionPolicy};
pub use config::{CacheConfig, ConfigError};
pub use entry::{
    CacheEntry, CacheKey, DataKind, EntryId, EntryTeardown, Payload, Source, SourceKind,
};
pub use error::{CacheError, CacheResult};
pub use gradient::{
    GradientCache, GradientDescriptor, GradientRamp, LinearRamp, RampHandle, RampProducer,
};
pub use image::{DecodeParams, DecodedImage, ImageCache, ImageDecoder, ImageHandle, ImageSource};
pub use manager::{CacheGuard, CacheManager};
pub use stats::{CacheStats, MemoryPressure};
