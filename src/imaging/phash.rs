//! Average-hash perceptual fingerprints.
//!
//! A fingerprint answers "is this the same picture?" cheaply and robustly
//! against re-encoding and small resampling differences:
//!
//! 1. center-square the raster and reduce it to a `grid × grid` image
//! 2. convert to luma (`0.299·R + 0.587·G + 0.114·B`)
//! 3. split into `blocks × blocks` cells and average each
//! 4. bit `i` is set when cell `i`'s mean is at or above the global mean
//!
//! Cells are visited row-major, so with the default 32/8 settings the
//! fingerprint is 64 bits. Two fingerprints are compared by Hamming distance;
//! at or below the configured threshold they count as the same picture.
//!
//! An unreadable raster yields an empty fingerprint, which never matches
//! anything.

use super::calculations::center_square;
use super::resources::{RawSource, ResourceTracker};
use crate::config::SimilarityConfig;
use image::DynamicImage;
use image::imageops::{self, FilterType};
use std::sync::Arc;
use tracing::warn;

/// Fixed-length bit vector produced by [`fingerprint_image`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bits: Vec<bool>,
}

impl Fingerprint {
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    /// The fingerprint of an unreadable raster.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Lowercase hex, most significant bit first, four bits per digit.
    pub fn to_hex(&self) -> String {
        self.bits
            .chunks(4)
            .map(|nibble| {
                let value = nibble
                    .iter()
                    .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit))
                    << (4 - nibble.len());
                char::from_digit(value, 16).unwrap_or('0')
            })
            .collect()
    }
}

/// Hamming distance between two fingerprints.
///
/// Fingerprints of different lengths, or either one empty, are maximally
/// distant.
pub fn distance(a: &Fingerprint, b: &Fingerprint) -> u32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return u32::MAX;
    }
    a.bits
        .iter()
        .zip(&b.bits)
        .filter(|(x, y)| x != y)
        .count() as u32
}

/// Compute the fingerprint of a decoded image.
pub fn fingerprint_image(image: &DynamicImage, config: &SimilarityConfig) -> Fingerprint {
    let grid = config.grid.max(1);
    let blocks = config.blocks.clamp(1, grid);
    let cell = grid / blocks;
    if image.width() == 0 || image.height() == 0 || cell == 0 {
        return Fingerprint::empty();
    }

    let rgb = image.to_rgb8();
    let square = center_square(rgb.width(), rgb.height());
    let side = square.size as u32;
    let cropped = imageops::crop_imm(&rgb, square.x as u32, square.y as u32, side, side).to_image();
    let small = imageops::resize(&cropped, grid, grid, FilterType::Triangle);

    let luma: Vec<f64> = small
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)
        })
        .collect();

    let mut means = Vec::with_capacity((blocks * blocks) as usize);
    for by in 0..blocks {
        for bx in 0..blocks {
            let mut sum = 0.0;
            for y in by * cell..(by + 1) * cell {
                for x in bx * cell..(bx + 1) * cell {
                    sum += luma[(y * grid + x) as usize];
                }
            }
            means.push(sum / f64::from(cell * cell));
        }
    }
    let global = means.iter().sum::<f64>() / means.len() as f64;
    Fingerprint::from_bits(means.iter().map(|&m| m >= global).collect())
}

/// Fingerprints encoded rasters through the shared resource tracker.
#[derive(Debug, Clone)]
pub struct HashEngine {
    tracker: Arc<ResourceTracker>,
    config: SimilarityConfig,
}

impl HashEngine {
    pub fn new(tracker: Arc<ResourceTracker>, config: SimilarityConfig) -> Self {
        Self { tracker, config }
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    /// Fingerprint encoded bytes. Undecodable input gives an empty fingerprint.
    pub fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        match self.tracker.acquire(RawSource::Encoded(bytes)) {
            Ok(handle) => fingerprint_image(&handle, &self.config),
            Err(e) => {
                warn!(error = %e, "could not fingerprint raster");
                Fingerprint::empty()
            }
        }
    }

    /// Whether two fingerprints are within the near-duplicate threshold.
    pub fn same_picture(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        distance(a, b) <= self.config.threshold
    }
}
