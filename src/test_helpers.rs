//! Shared test utilities for the portrait-kit test suite.
//!
//! Synthetic rasters with known structure, EXIF byte builders, and a store
//! whose writes can be held open to exercise the session's busy gate.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let jpeg = jpeg_with_app1(&jpeg_bytes(40, 30), &exif_block(6, false));
//! assert_eq!(read_orientation_code(&jpeg), 6);
//!
//! let store = GatedStore::new();
//! let entered = store.gate("p-1");
//! // ... start a commit on another thread, then:
//! entered.recv().unwrap();
//! store.release();
//! ```

use crate::store::{BinaryStore, MemoryStore, StoreError, lock};
use image::{ImageEncoder, Rgb, RgbImage};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex};

// =========================================================================
// Encoded rasters
// =========================================================================

pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    buf
}

pub fn encode_jpeg(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 95)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    buf
}

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// A small JPEG with a two-axis color gradient.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_jpeg(&gradient(width, height))
}

/// A small PNG with a two-axis color gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&gradient(width, height))
}

/// PNG of a single color.
pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(width, height, Rgb(color)))
}

/// Square PNG whose top-left quadrant is `corner` and the rest `rest`.
pub fn quadrant_image(side: u32, corner: [u8; 3], rest: [u8; 3]) -> Vec<u8> {
    let half = side / 2;
    encode_png(&RgbImage::from_fn(side, side, |x, y| {
        if x < half && y < half {
            Rgb(corner)
        } else {
            Rgb(rest)
        }
    }))
}

/// Gray PNG brightening from left to right. Luma depends on `x` only.
pub fn gradient_image(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbImage::from_fn(width, height, |x, _| {
        let v = (x * 255 / width.max(1)) as u8;
        Rgb([v, v, v])
    }))
}

/// PNG with a dark left half and a bright right half.
///
/// A quarter turn moves the dark half to the top, so its fingerprint
/// differs from the upright one in half of its bits.
pub fn split_image(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([30, 40, 50])
        } else {
            Rgb([220, 210, 200])
        }
    }))
}

/// Square PNG with a 4×4 dark/bright checkerboard.
///
/// Far (half the bits) from [`split_image`] in any quarter-turn orientation.
pub fn checker_image(side: u32) -> Vec<u8> {
    let square = (side / 4).max(1);
    encode_png(&RgbImage::from_fn(side, side, |x, y| {
        if ((x / square) + (y / square)) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([20, 20, 20])
        }
    }))
}

// =========================================================================
// EXIF
// =========================================================================

/// A TIFF block with one IFD0 entry: Orientation = `code` (SHORT, count 1).
///
/// Layout: header (8) + entry count (2) + entry (12) + next-IFD offset (4).
pub fn tiff_header(code: u16, big_endian: bool) -> Vec<u8> {
    let u16b = |v: u16| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let u32b = |v: u32| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };

    let mut out = Vec::with_capacity(26);
    out.extend_from_slice(if big_endian { b"MM" } else { b"II" });
    out.extend_from_slice(&u16b(42));
    out.extend_from_slice(&u32b(8));
    out.extend_from_slice(&u16b(1));
    out.extend_from_slice(&u16b(0x0112));
    out.extend_from_slice(&u16b(3));
    out.extend_from_slice(&u32b(1));
    // SHORT values are left-aligned in the 4-byte value field
    out.extend_from_slice(&u16b(code));
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&u32b(0));
    out
}

/// APP1 payload: `"Exif\0\0"` followed by [`tiff_header`].
pub fn exif_block(code: u16, big_endian: bool) -> Vec<u8> {
    let mut out = b"Exif\0\0".to_vec();
    out.extend(tiff_header(code, big_endian));
    out
}

/// Insert an APP1 segment carrying `payload` right after the JPEG's SOI marker.
pub fn jpeg_with_app1(jpeg: &[u8], payload: &[u8]) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG");
    let length = u16::try_from(payload.len() + 2).unwrap();
    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// =========================================================================
// GatedStore
// =========================================================================

/// A [`MemoryStore`] whose `put` to one chosen key blocks until released.
///
/// [`gate`](Self::gate) returns a receiver that fires when a writer reaches
/// the gate, so a test knows the other thread is parked mid-command.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Gate>,
    opened: Condvar,
}

#[derive(Default)]
struct Gate {
    key: Option<String>,
    closed: bool,
    entered: Option<Sender<()>>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Hold writes to `key` until [`release`](Self::release).
    pub fn gate(&self, key: &str) -> Receiver<()> {
        let (tx, rx) = mpsc::channel();
        let mut gate = lock(&self.gate);
        gate.key = Some(key.to_string());
        gate.closed = true;
        gate.entered = Some(tx);
        rx
    }

    pub fn release(&self) {
        lock(&self.gate).closed = false;
        self.opened.notify_all();
    }
}

impl BinaryStore for GatedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut gate = lock(&self.gate);
        if gate.closed && gate.key.as_deref() == Some(key) {
            if let Some(entered) = &gate.entered {
                let _ = entered.send(());
            }
            while gate.closed {
                gate = self
                    .opened
                    .wait(gate)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
        }
        drop(gate);
        self.inner.put(key, bytes)
    }

    fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.inner.clear(key)
    }
}
