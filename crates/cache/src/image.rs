//! Image decode cache
//!
//! Memoizes decoded pixel buffers keyed by image source and decode
//! parameters. Decoding happens outside the cache lock; the result is
//! published under the lock after a second lookup, so a slow decode never
//! blocks other draw units and a key is never published twice.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::entry::{CacheEntry, CacheKey, DataKind, EntryId, EntryTeardown, Source};
use crate::error::{CacheError, CacheResult};
use crate::manager::{CacheGuard, CacheManager};

/// Pixel format a decoder is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    /// Whatever the source is stored in
    #[default]
    Native,
    A8,
    Rgb565,
    Rgb888,
    Argb8888,
    Xrgb8888,
}

impl ColorFormat {
    /// Bytes per pixel, `None` for [`ColorFormat::Native`]
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            ColorFormat::Native => None,
            ColorFormat::A8 => Some(1),
            ColorFormat::Rgb565 => Some(2),
            ColorFormat::Rgb888 => Some(3),
            ColorFormat::Argb8888 | ColorFormat::Xrgb8888 => Some(4),
        }
    }

    fn code(&self) -> u64 {
        match self {
            ColorFormat::Native => 0,
            ColorFormat::A8 => 1,
            ColorFormat::Rgb565 => 2,
            ColorFormat::Rgb888 => 3,
            ColorFormat::Argb8888 => 4,
            ColorFormat::Xrgb8888 => 5,
        }
    }
}

/// Dimensions and layout of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub color_format: ColorFormat,
    /// Bytes per row
    pub stride: u32,
}

/// An image compiled into or built by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub header: ImageHeader,
    pub data: Vec<u8>,
}

/// Where an image comes from.
///
/// In-memory images are identified by the address of their shared data, so
/// two `Arc`s pointing at the same [`ImageData`] hit the same entry.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Variable(Arc<ImageData>),
    File(Arc<str>),
}

impl ImageSource {
    pub fn file(path: impl Into<Arc<str>>) -> Self {
        ImageSource::File(path.into())
    }

    /// Key source identifying this image in the cache
    pub fn cache_source(&self) -> Source {
        match self {
            ImageSource::Variable(data) => Source::from_ptr(Arc::as_ptr(data)),
            ImageSource::File(path) => Source::Path(Arc::clone(path)),
        }
    }
}

/// Per-open decode parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeParams {
    pub color_format: ColorFormat,
    /// Frame of an animated image
    pub frame: u32,
    /// Drop the entry again once this user closes it
    pub no_cache: bool,
}

impl DecodeParams {
    pub fn new(color_format: ColorFormat) -> Self {
        Self {
            color_format,
            ..Default::default()
        }
    }

    pub fn with_frame(mut self, frame: u32) -> Self {
        self.frame = frame;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }
}

/// A decoded pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub header: ImageHeader,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Bytes charged against the cache budget
    pub fn data_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Errors reported by image decoders.
///
/// `Io` converts from [`io::Error`], so decoders reading files can use `?`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no decoder accepts this source")]
    Unsupported,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt image data: {0}")]
    Corrupt(String),
}

impl From<DecodeError> for CacheError {
    fn from(err: DecodeError) -> Self {
        CacheError::Producer(err.to_string())
    }
}

/// Produces pixel buffers for the image cache.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, source: &ImageSource, params: &DecodeParams)
        -> Result<DecodedImage, DecodeError>;

    /// Whether decoded buffers remain owned by the decoder. When true, the
    /// cache hands each buffer back through [`ImageDecoder::free`] once its
    /// entry is destroyed.
    fn owns_buffers(&self) -> bool {
        false
    }

    /// Take back a buffer the cache no longer needs
    fn free(&self, _image: &DecodedImage) {}
}

/// Returns decoder-owned buffers when an image entry is destroyed
struct ImageTeardown {
    decoder: Arc<dyn ImageDecoder>,
    /// Image data borrowed from the application. A pointer key does not own
    /// what it points at, so the data is held until the entry goes away and
    /// its address cannot be reused by another image meanwhile.
    borrowed: Mutex<Option<Arc<ImageData>>>,
}

impl EntryTeardown for ImageTeardown {
    fn on_invalidate(&self, entry: &CacheEntry) {
        if !entry.owns_key_source() {
            if let Some(data) = self.borrowed.lock().take() {
                trace!(id = %entry.id(), refs = Arc::strong_count(&data), "returning image source");
            }
        }
        if entry.owns_payload() {
            return;
        }
        if let Some(image) = entry.payload_as::<DecodedImage>() {
            self.decoder.free(&image);
        }
    }
}

/// An opened image; pass it back to [`ImageCache::close`] when done.
#[derive(Debug)]
pub struct ImageHandle {
    id: EntryId,
    image: Arc<DecodedImage>,
    no_cache: bool,
    hit: bool,
}

impl ImageHandle {
    pub fn image(&self) -> &DecodedImage {
        &self.image
    }

    /// Shared handle to the pixels, valid after the handle is closed
    pub fn shared(&self) -> Arc<DecodedImage> {
        Arc::clone(&self.image)
    }

    pub fn entry_id(&self) -> EntryId {
        self.id
    }

    /// True if the image was served from the cache without decoding
    pub fn was_cached(&self) -> bool {
        self.hit
    }
}

/// Image cache adapter over a shared [`CacheManager`].
pub struct ImageCache {
    manager: CacheManager,
    decoder: Arc<dyn ImageDecoder>,
}

impl ImageCache {
    pub fn new(manager: CacheManager, decoder: Arc<dyn ImageDecoder>) -> Self {
        Self { manager, decoder }
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    /// Open an image, decoding it only on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Producer`] if the decoder fails; nothing is
    /// inserted in that case.
    pub fn open(&self, source: &ImageSource, params: DecodeParams) -> CacheResult<ImageHandle> {
        let key = Self::key(source, &params);

        {
            let mut cache = self.manager.lock();
            if let Some(id) = cache.find(&key, DataKind::IMAGE) {
                if let Some(handle) = Self::acquire_cached(&mut cache, id, &params, true)? {
                    trace!(id = %id, "image served from cache");
                    return Ok(handle);
                }
            }
        }

        let started = Instant::now();
        let decoded = self.decoder.decode(source, &params).map_err(|err| {
            warn!(source = ?key.source, error = %err, "image decode failed");
            CacheError::from(err)
        })?;
        let weight = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);

        let mut cache = self.manager.lock();

        // Another draw unit may have published the same image meanwhile
        if let Some(id) = cache.lookup(&key, DataKind::IMAGE) {
            if let Some(handle) = Self::acquire_cached(&mut cache, id, &params, false)? {
                self.hand_back(&decoded);
                return Ok(handle);
            }
        }

        let id = match cache.reserve(decoded.data_size()) {
            Ok(id) => id,
            Err(err) => {
                self.hand_back(&decoded);
                return Err(err);
            }
        };

        let image = Arc::new(decoded);
        let entry = cache.entry_mut(id).ok_or(CacheError::UnknownEntry(id))?;
        entry.publish(key, DataKind::IMAGE, image.clone());
        entry.set_weight(weight);
        entry.set_ownership(
            !self.decoder.owns_buffers(),
            matches!(source, ImageSource::File(_)),
        );
        let borrowed = match source {
            ImageSource::Variable(data) => Some(Arc::clone(data)),
            ImageSource::File(_) => None,
        };
        entry.set_teardown(Box::new(ImageTeardown {
            decoder: Arc::clone(&self.decoder),
            borrowed: Mutex::new(borrowed),
        }));
        cache.acquire(id)?;

        Ok(ImageHandle {
            id,
            image,
            no_cache: params.no_cache,
            hit: false,
        })
    }

    /// Release an opened image.
    ///
    /// Images opened with [`DecodeParams::no_cache`] are dropped from the
    /// cache as soon as no other user holds them.
    pub fn close(&self, handle: ImageHandle) -> CacheResult<()> {
        let mut cache = self.manager.lock();
        cache.release(handle.id)?;

        if handle.no_cache {
            let unused = cache.entry(handle.id).is_some_and(|entry| !entry.is_pinned());
            if unused {
                cache.invalidate(handle.id)?;
            }
        }
        Ok(())
    }

    /// Drop every unused image of `source`, or every unused entry when
    /// `source` is `None`. Returns the number of entries removed.
    pub fn drop_source(&self, source: Option<&ImageSource>) -> usize {
        let source = source.map(ImageSource::cache_source);
        self.manager.drop_source(source.as_ref())
    }

    fn key(source: &ImageSource, params: &DecodeParams) -> CacheKey {
        CacheKey::new(
            source.cache_source(),
            params.color_format.code(),
            u64::from(params.frame),
        )
    }

    /// Give a decode the cache did not keep back to the decoder, if the
    /// decoder owns it.
    fn hand_back(&self, decoded: &DecodedImage) {
        if self.decoder.owns_buffers() {
            self.decoder.free(decoded);
        }
    }

    fn acquire_cached(
        cache: &mut CacheGuard<'_>,
        id: EntryId,
        params: &DecodeParams,
        hit: bool,
    ) -> CacheResult<Option<ImageHandle>> {
        let Some(image) = cache.entry(id).and_then(|e| e.payload_as::<DecodedImage>()) else {
            return Ok(None);
        };
        cache.acquire(id)?;

        Ok(Some(ImageHandle {
            id,
            image,
            no_cache: params.no_cache,
            hit,
        }))
    }
}
