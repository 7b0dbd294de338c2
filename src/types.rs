//! Shared types used across the imaging, history and session modules.
//!
//! [`TransformFlags`] and [`SubjectRecord`] are serialized (the CLI keeps
//! records in `subjects.json`), so field names are part of the on-disk format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of the person whose portrait is being edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A subject's own record, as kept by the family-data collaborator.
///
/// The presence flags mirror whether the original and crop-baseline artifacts
/// exist in the store; they are the first thing idempotence checks consult.
/// `family` + `path` identify records migrated from the legacy path-keyed
/// layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub has_original: bool,
    #[serde(default)]
    pub has_crop_base: bool,
    /// Flags of the committed raster.
    #[serde(default)]
    pub flags: TransformFlags,
}

impl SubjectRecord {
    pub fn new(id: impl Into<SubjectId>) -> Self {
        Self {
            id: id.into(),
            family: None,
            path: None,
            has_original: false,
            has_crop_base: false,
            flags: TransformFlags::default(),
        }
    }

    /// Record migrated from the family+path layout.
    pub fn legacy(id: impl Into<SubjectId>, family: &str, path: &str) -> Self {
        Self {
            family: Some(family.to_string()),
            path: Some(path.to_string()),
            ..Self::new(id)
        }
    }
}

/// Which transforms are applied to the pending or committed raster.
///
/// Single source of truth for transform state; the session keeps one for the
/// working image and every history snapshot carries a copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformFlags {
    pub rotated: bool,
    pub cropped: bool,
    pub fitted: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    /// Accumulated rotation in degrees, normalized to `[0, 360)`.
    pub rotate_deg: f32,
}

impl TransformFlags {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Drop crop and fit, keeping rotation and flips.
    pub fn clear_crop(&mut self) {
        self.cropped = false;
        self.fitted = false;
    }
}

/// Normalize an angle in degrees into `[0, 360)`.
pub fn normalize_degrees(deg: f32) -> f32 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if d >= 360.0 { 0.0 } else { d }
}

/// A square region of the source raster, in source pixel coordinates.
///
/// `x`/`y` are the top-left corner. For fit the region may extend past the
/// source bounds; for crop it is clamped inside them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self { x, y, size }
    }
}

/// Mirroring axis. `X` mirrors horizontally (left ↔ right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

/// Quarter-turn direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    pub fn degrees(self) -> f32 {
        match self {
            Self::Clockwise => 90.0,
            Self::CounterClockwise => -90.0,
        }
    }
}
