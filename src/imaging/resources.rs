//! Ownership of transient decoded images.
//!
//! Decoding a photo is the expensive, memory-heavy step of every edit. Each
//! decode goes through [`ResourceTracker::acquire`], which returns an
//! [`ImageHandle`] guard. The handle derefs to the decoded image and releases
//! its tracking entry when dropped, including on `?` early returns and when a
//! cancelled operation unwinds.
//!
//! Invariants:
//! - a handle is released at most once (explicit [`release`](ResourceTracker::release),
//!   drop, and [`release_all`](ResourceTracker::release_all) all go through one
//!   idempotent path)
//! - [`live`](ResourceTracker::live) is zero whenever no operation is running
//!   and nothing was [promoted](ImageHandle::promote)
//!
//! Sources that are already decoded and committed ([`RawSource::Committed`])
//! pass straight through: the handle wraps them without tracking.

use super::transform::TransformError;
use image::{DynamicImage, ImageReader};
use std::collections::HashSet;
use std::io::Cursor;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Where the pixels of an acquisition come from.
#[derive(Debug, Clone)]
pub enum RawSource<'a> {
    /// Encoded bytes that must be decoded.
    Encoded(&'a [u8]),
    /// An image already decoded and owned elsewhere.
    Committed(Arc<DynamicImage>),
}

/// Tracks every live decoded-image handle.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode (or wrap) a source into a scoped handle.
    pub fn acquire(&self, source: RawSource<'_>) -> Result<ImageHandle<'_>, TransformError> {
        match source {
            RawSource::Committed(image) => Ok(ImageHandle {
                tracker: self,
                id: None,
                image,
            }),
            RawSource::Encoded(bytes) => {
                let image = decode(bytes)?;
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.live_set().insert(id);
                self.acquired.fetch_add(1, Ordering::Relaxed);
                debug!(
                    id,
                    width = image.width(),
                    height = image.height(),
                    "acquired image handle"
                );
                Ok(ImageHandle {
                    tracker: self,
                    id: Some(id),
                    image: Arc::new(image),
                })
            }
        }
    }

    /// Release a handle now rather than at the end of its scope.
    pub fn release(&self, handle: ImageHandle<'_>) {
        drop(handle);
    }

    /// Release every live handle. Returns how many were released.
    ///
    /// Handles still held by callers stay readable; dropping them later is a
    /// no-op for the tracker.
    pub fn release_all(&self) -> usize {
        let mut live = self.live_set();
        let count = live.len();
        live.clear();
        self.released.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            warn!(count, "released image handles in bulk");
        }
        count
    }

    /// Number of handles currently tracked.
    pub fn live(&self) -> usize {
        self.live_set().len()
    }

    /// Total tracked acquisitions since creation.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total releases since creation. Never exceeds [`acquired`](Self::acquired).
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    fn release_id(&self, id: u64) {
        if self.live_set().remove(&id) {
            self.released.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn live_set(&self) -> std::sync::MutexGuard<'_, HashSet<u64>> {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Decode an encoded raster, sniffing the format from its bytes.
fn decode(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| TransformError::Decode(e.to_string()))
}

/// Scoped guard over a decoded image. Releases on drop.
#[derive(Debug)]
pub struct ImageHandle<'t> {
    tracker: &'t ResourceTracker,
    id: Option<u64>,
    image: Arc<DynamicImage>,
}

impl ImageHandle<'_> {
    /// Whether this handle counts against the tracker.
    pub fn is_tracked(&self) -> bool {
        self.id.is_some()
    }

    /// Keep the decoded image beyond the operation, as a committed asset.
    ///
    /// The tracking entry is released; the returned image is owned by the caller.
    pub fn promote(mut self) -> Arc<DynamicImage> {
        if let Some(id) = self.id.take() {
            self.tracker.release_id(id);
        }
        Arc::clone(&self.image)
    }
}

impl Deref for ImageHandle<'_> {
    type Target = DynamicImage;

    fn deref(&self) -> &DynamicImage {
        &self.image
    }
}

impl Drop for ImageHandle<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.tracker.release_id(id);
        }
    }
}
