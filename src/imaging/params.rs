//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the session (which decides what edit the user asked
//! for) and the [`transform`](super::transform) engine (which does the pixel
//! work).
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputParams`]: side cap, quality, and fit background for every emitted raster.
//! - [`TransformOp`]: one edit: orientation correction, rotation, flip, crop, fit, or a
//!   combined flip+rotation rendered in a single pass.

use super::orientation::Orientation;
use crate::config::OutputConfig;
use crate::types::{Direction, Region};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Encoding parameters shared by every transform output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputParams {
    /// Side cap of the square output, in pixels.
    pub max_dimension: u32,
    pub quality: Quality,
    /// RGB fill where a fit region reaches past the source.
    pub background: [u8; 3],
}

impl OutputParams {
    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            max_dimension: config.max_dimension.max(1),
            quality: Quality::new(config.quality),
            background: config.background,
        }
    }
}

impl Default for OutputParams {
    fn default() -> Self {
        Self::from_config(&OutputConfig::default())
    }
}

/// A single edit the transform engine can apply.
///
/// Every variant produces a square raster no larger than
/// [`OutputParams::max_dimension`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformOp {
    /// Center-square the source with no geometric change.
    Normalize,
    /// Undo the camera's orientation so the picture is upright.
    OrientationCorrect(Orientation),
    /// Rotate by an arbitrary angle (clockwise degrees) about the center,
    /// then keep the largest centered square that holds no fill.
    Rotate { degrees: f32 },
    /// Exact quarter turn, then center-square.
    Rotate90(Direction),
    /// Mirror horizontally (`x`) and/or vertically (`y`).
    Flip { x: bool, y: bool },
    /// Flips and a rotation rendered as one affine pass.
    ///
    /// Flips are applied first, then the rotation, matching the order the
    /// session accumulates them in.
    Composite {
        flip_x: bool,
        flip_y: bool,
        degrees: f32,
    },
    /// Map a square region, clamped inside the source, onto the full frame.
    Crop(Region),
    /// Map a square region, possibly reaching past the source, onto the full
    /// frame; uncovered area takes the background fill.
    Fit(Region),
}
