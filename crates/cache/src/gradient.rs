//! Gradient ramp cache
//!
//! Caches the color and alpha ramps the software renderer samples when it
//! fills a gradient. A ramp is keyed by a digest of the gradient's stops,
//! direction and output extent plus the exact extent; its budget charge is the
//! packed size of all maps it carries.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheKey, DataKind, EntryId, EntryTeardown};
use crate::error::{CacheError, CacheResult};
use crate::manager::{CacheGuard, CacheManager};

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Signed, higher precision color used for error diffusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaledColor {
    pub r: i16,
    pub g: i16,
    pub b: i16,
}

/// One color stop; `frac` is its position on a 0..=255 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GradientStop {
    pub color: Color,
    pub opa: u8,
    pub frac: u8,
}

impl GradientStop {
    pub const fn new(color: Color, opa: u8, frac: u8) -> Self {
        Self { color, opa, frac }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradientDirection {
    /// Colors change along the x axis
    Horizontal,
    /// Colors change along the y axis
    Vertical,
}

/// Description of a linear gradient
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GradientDescriptor {
    /// Stops in ascending `frac` order
    pub stops: Vec<GradientStop>,
    pub direction: GradientDirection,
}

impl GradientDescriptor {
    pub fn new(direction: GradientDirection, stops: Vec<GradientStop>) -> Self {
        Self { stops, direction }
    }

    /// Two-stop opaque gradient
    pub fn simple(direction: GradientDirection, from: Color, to: Color) -> Self {
        Self::new(
            direction,
            vec![GradientStop::new(from, 255, 0), GradientStop::new(to, 255, 255)],
        )
    }

    /// Number of ramp entries needed for a `width` x `height` fill
    pub fn ramp_len(&self, width: u32, height: u32) -> usize {
        match self.direction {
            GradientDirection::Horizontal => width as usize,
            GradientDirection::Vertical => height as usize,
        }
    }

    fn digest(&self, width: u32, height: u32) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        self.ramp_len(width, height).hash(&mut hasher);
        hasher.finish()
    }
}

/// A computed gradient ramp.
///
/// `color_map` and `opa_map` hold one sample per ramp position. With
/// dithering enabled the ramp also carries the high-bit-depth map the dither
/// reads from and the per-column error accumulator it writes to.
#[derive(Debug)]
pub struct GradientRamp {
    pub color_map: Vec<Color>,
    pub opa_map: Vec<u8>,
    pub hmap: Option<Vec<ScaledColor>>,
    /// Error diffusion state, one slot per output column
    pub error_acc: Option<Mutex<Vec<ScaledColor>>>,
}

impl GradientRamp {
    pub fn len(&self) -> usize {
        self.color_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.color_map.is_empty()
    }

    pub fn is_dithered(&self) -> bool {
        self.hmap.is_some()
    }

    /// Bytes charged against the cache budget: every map as if laid out
    /// contiguously after the record, each section pointer-aligned.
    pub fn packed_size(len: usize, width: usize, dither: bool) -> usize {
        let mut size = align(size_of::<GradientRamp>())
            + align(len * size_of::<Color>())
            + align(len * size_of::<u8>());
        if dither {
            size += align(len * size_of::<ScaledColor>());
            size += align(width * size_of::<ScaledColor>());
        }
        size
    }
}

fn align(bytes: usize) -> usize {
    bytes.next_multiple_of(size_of::<usize>())
}

/// Computes gradient ramps for the cache.
pub trait RampProducer: Send + Sync {
    /// Fill a ramp of `len` samples; `width` sizes the dither accumulator.
    fn compute(
        &self,
        descriptor: &GradientDescriptor,
        len: usize,
        width: usize,
        dither: bool,
    ) -> CacheResult<GradientRamp>;

    /// Take back a ramp the cache no longer needs
    fn recycle(&self, _ramp: &GradientRamp) {}
}

/// Linear interpolation between neighbouring color stops
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearRamp;

impl LinearRamp {
    /// Color and opacity at position `frac` of a ramp spanning `range`.
    ///
    /// Positions are scaled in 64 bits, so no `i32` range can overflow.
    pub fn sample(descriptor: &GradientDescriptor, range: i32, frac: i32) -> (Color, u8) {
        let stops = &descriptor.stops;
        let frac = i64::from(frac);
        let position = |stop: &GradientStop| (i64::from(stop.frac) * i64::from(range)) >> 8;

        let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
            return (Color::default(), 0);
        };
        if frac <= position(first) {
            return (first.color, first.opa);
        }
        if frac >= position(last) {
            return (last.color, last.opa);
        }

        let (one, two) = stops
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .find(|(_, next)| frac <= position(next))
            .unwrap_or((*last, *last));

        let min = position(&one);
        let span = (position(&two) - min).max(1);
        let mix = ((frac - min) * 255 / span).clamp(0, 255);
        let imix = 255 - mix;
        let blend = |a: u8, b: u8| ((i64::from(b) * mix + i64::from(a) * imix) / 255) as u8;

        (
            Color::new(
                blend(one.color.r, two.color.r),
                blend(one.color.g, two.color.g),
                blend(one.color.b, two.color.b),
            ),
            blend(one.opa, two.opa),
        )
    }
}

impl RampProducer for LinearRamp {
    fn compute(
        &self,
        descriptor: &GradientDescriptor,
        len: usize,
        width: usize,
        dither: bool,
    ) -> CacheResult<GradientRamp> {
        let range = i32::try_from(len)
            .map_err(|_| CacheError::Producer(format!("gradient too long: {len}")))?;

        let (color_map, opa_map): (Vec<Color>, Vec<u8>) =
            (0..range).map(|i| Self::sample(descriptor, range, i)).unzip();

        let (hmap, error_acc) = if dither {
            let hmap = color_map
                .iter()
                .map(|c| ScaledColor {
                    r: i16::from(c.r) << 4,
                    g: i16::from(c.g) << 4,
                    b: i16::from(c.b) << 4,
                })
                .collect();
            (Some(hmap), Some(Mutex::new(vec![ScaledColor::default(); width])))
        } else {
            (None, None)
        };

        Ok(GradientRamp {
            color_map,
            opa_map,
            hmap,
            error_acc,
        })
    }
}

/// Hands ramps back to their producer when their entry is destroyed
struct RampTeardown {
    producer: Arc<dyn RampProducer>,
}

impl EntryTeardown for RampTeardown {
    fn on_invalidate(&self, entry: &CacheEntry) {
        if let Some(ramp) = entry.payload_as::<GradientRamp>() {
            self.producer.recycle(&ramp);
        }
    }
}

/// A cached ramp in use; pass it back to [`GradientCache::release`].
#[derive(Debug)]
pub struct RampHandle {
    id: EntryId,
    ramp: Arc<GradientRamp>,
    hit: bool,
}

impl RampHandle {
    pub fn ramp(&self) -> &GradientRamp {
        &self.ramp
    }

    pub fn entry_id(&self) -> EntryId {
        self.id
    }

    pub fn was_cached(&self) -> bool {
        self.hit
    }
}

/// Gradient cache adapter over a shared [`CacheManager`].
pub struct GradientCache {
    manager: CacheManager,
    producer: Arc<dyn RampProducer>,
    dither: bool,
}

impl GradientCache {
    /// Adapter computing ramps with [`LinearRamp`]
    pub fn new(manager: CacheManager, config: &CacheConfig) -> Self {
        Self::with_producer(manager, Arc::new(LinearRamp), config.gradient_dither)
    }

    pub fn with_producer(
        manager: CacheManager,
        producer: Arc<dyn RampProducer>,
        dither: bool,
    ) -> Self {
        Self {
            manager,
            producer,
            dither,
        }
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    /// Get the ramp for filling a `width` x `height` area, computing and
    /// caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Producer`] for descriptors with fewer than two
    /// stops, an empty extent, or a failed computation.
    pub fn get_ramp(
        &self,
        descriptor: &GradientDescriptor,
        width: u32,
        height: u32,
    ) -> CacheResult<RampHandle> {
        if descriptor.stops.len() < 2 {
            return Err(CacheError::Producer(
                "gradient needs at least two stops".to_string(),
            ));
        }
        let len = descriptor.ramp_len(width, height);
        if len == 0 {
            return Err(CacheError::Producer("gradient has an empty extent".to_string()));
        }

        let key = Self::key(descriptor, width, height);
        let mut cache = self.manager.lock();

        if let Some(id) = cache.find(&key, DataKind::GRADIENT) {
            if let Some(ramp) = cache.entry(id).and_then(|e| e.payload_as::<GradientRamp>()) {
                cache.acquire(id)?;
                trace!(id = %id, "gradient served from cache");
                return Ok(RampHandle { id, ramp, hit: true });
            }
        }

        let ramp = self
            .producer
            .compute(descriptor, len, width as usize, self.dither)
            .inspect_err(|err| warn!(error = %err, "gradient computation failed"))?;
        let ramp = Arc::new(ramp);

        let id = cache.reserve(GradientRamp::packed_size(len, width as usize, self.dither))?;
        let entry = cache.entry_mut(id).ok_or(CacheError::UnknownEntry(id))?;
        entry.publish(key, DataKind::GRADIENT, ramp.clone());
        entry.set_teardown(Box::new(RampTeardown {
            producer: Arc::clone(&self.producer),
        }));
        cache.acquire(id)?;

        Ok(RampHandle {
            id,
            ramp,
            hit: false,
        })
    }

    /// Stop using a ramp
    pub fn release(&self, handle: RampHandle) -> CacheResult<()> {
        self.manager.lock().release(handle.id)
    }

    /// Remove the cached ramp for this gradient regardless of how long it
    /// has lived. Ramps still in use are left alone.
    ///
    /// Returns true if an entry was removed.
    pub fn pop(&self, descriptor: &GradientDescriptor, width: u32, height: u32) -> bool {
        let key = Self::key(descriptor, width, height);
        let mut cache = self.manager.lock();
        Self::pop_locked(&mut cache, &key)
    }

    fn pop_locked(cache: &mut CacheGuard<'_>, key: &CacheKey) -> bool {
        let Some(id) = cache.find(key, DataKind::GRADIENT) else {
            return false;
        };
        if cache.entry(id).is_some_and(CacheEntry::is_pinned) {
            warn!(id = %id, "refusing to pop a gradient ramp in use");
            return false;
        }
        cache.invalidate(id).is_ok()
    }

    fn key(descriptor: &GradientDescriptor, width: u32, height: u32) -> CacheKey {
        let extent = (u64::from(width) << 32) | u64::from(height);
        CacheKey::derived(descriptor.digest(width, height), extent)
    }
}
