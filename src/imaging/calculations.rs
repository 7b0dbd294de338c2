//! Pure geometry for the transform engine.
//!
//! All functions here are pure and testable without any I/O or images.
//! Coordinates are continuous: pixel `i` covers `[i, i + 1)`, so its center
//! is at `i + 0.5`.

use crate::types::Region;

/// A 2-D affine map `(x, y) → (a·x + b·y + c, d·x + e·y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 1.0,
        f: 0.0,
    };

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            c: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    pub fn scale(s: f64) -> Self {
        Self {
            a: s,
            e: s,
            ..Self::IDENTITY
        }
    }

    /// Mirror about the origin's vertical (`x`) and/or horizontal (`y`) axis.
    pub fn flip(x: bool, y: bool) -> Self {
        Self {
            a: if x { -1.0 } else { 1.0 },
            e: if y { -1.0 } else { 1.0 },
            ..Self::IDENTITY
        }
    }

    /// Clockwise rotation on screen (y grows downward).
    pub fn rotate(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            a: cos,
            b: -sin,
            c: 0.0,
            d: sin,
            e: cos,
            f: 0.0,
        }
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn after(&self, inner: &Affine) -> Affine {
        Affine {
            a: self.a * inner.a + self.b * inner.d,
            b: self.a * inner.b + self.b * inner.e,
            c: self.a * inner.c + self.b * inner.f + self.c,
            d: self.d * inner.a + self.e * inner.d,
            e: self.d * inner.b + self.e * inner.e,
            f: self.d * inner.c + self.e * inner.f + self.f,
        }
    }

    /// Chain builder: apply `self` first, then `outer`.
    pub fn then(&self, outer: &Affine) -> Affine {
        outer.after(self)
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.c,
            self.d * x + self.e * y + self.f,
        )
    }

    /// Inverse map, or `None` if the map collapses the plane.
    pub fn invert(&self) -> Option<Affine> {
        let det = self.a * self.e - self.b * self.d;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        let a = self.e * inv;
        let b = -self.b * inv;
        let d = -self.d * inv;
        let e = self.a * inv;
        Some(Affine {
            a,
            b,
            c: -(a * self.c + b * self.f),
            d,
            e,
            f: -(d * self.c + e * self.f),
        })
    }
}

/// Side of the largest square, centered on the image, that fits inside a
/// `width × height` image rotated by `degrees`.
///
/// Corners of a centered square of side `s` land, after rotating back, at
/// `±s/2 · (|cos θ| + |sin θ|)` on each axis, so the square fits iff
/// `s · (|cos θ| + |sin θ|) ≤ min(width, height)`.
pub fn inscribed_square_side(width: f64, height: f64, degrees: f64) -> f64 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    width.min(height) / (cos.abs() + sin.abs())
}

/// The centered square of a `width × height` image.
pub fn center_square(width: u32, height: u32) -> Region {
    let side = width.min(height) as f32;
    Region {
        x: (width as f32 - side) / 2.0,
        y: (height as f32 - side) / 2.0,
        size: side,
    }
}

/// Whether a region has a usable, finite size.
pub fn region_is_valid(region: &Region) -> bool {
    region.x.is_finite() && region.y.is_finite() && region.size.is_finite() && region.size >= 1.0
}

/// Clamp a crop region inside a `width × height` source.
///
/// The size is capped at the short side first, then the origin is pulled
/// back so the whole square lies on the source.
pub fn clamp_crop_region(region: &Region, width: u32, height: u32) -> Region {
    let short = width.min(height).max(1) as f32;
    let size = region.size.clamp(1.0, short);
    Region {
        x: region.x.clamp(0.0, (width as f32 - size).max(0.0)),
        y: region.y.clamp(0.0, (height as f32 - size).max(0.0)),
        size,
    }
}

/// Render size for a region of `region_side` source pixels.
///
/// Returns `(render, output)`: the warp renders at `render` (never upsampling
/// past the source, capped at four times the output cap to bound memory),
/// then the result is resized down to `output ≤ max_dimension`.
pub fn render_sides(region_side: f64, max_dimension: u32) -> (u32, u32) {
    let max_dimension = max_dimension.max(1);
    let native = region_side.round().max(1.0).min(f64::from(u32::MAX)) as u32;
    let render = native.min(max_dimension.saturating_mul(4));
    (render, render.min(max_dimension))
}

/// Map from source coordinates onto a square output of side `out_side`
/// showing `region` of the source.
pub fn region_to_output(region: &Region, out_side: u32) -> Affine {
    let s = f64::from(out_side) / f64::from(region.size);
    Affine::translate(-f64::from(region.x), -f64::from(region.y)).then(&Affine::scale(s))
}

/// Map from source coordinates onto a square output of side `out_side`,
/// after flipping and rotating the source about its center and keeping a
/// centered square of side `square_side` (in source pixels).
pub fn rotation_to_output(
    width: u32,
    height: u32,
    flip_x: bool,
    flip_y: bool,
    degrees: f64,
    square_side: f64,
    out_side: u32,
) -> Affine {
    let half = f64::from(out_side) / 2.0;
    Affine::translate(-f64::from(width) / 2.0, -f64::from(height) / 2.0)
        .then(&Affine::flip(flip_x, flip_y))
        .then(&Affine::rotate(degrees))
        .then(&Affine::scale(f64::from(out_side) / square_side))
        .then(&Affine::translate(half, half))
}

/// Convert a continuous-coordinate map into one over pixel indices (pixel
/// centers at integers), as sampled by the warp.
pub fn to_pixel_index_space(map: &Affine) -> Affine {
    Affine::translate(0.5, 0.5)
        .then(map)
        .then(&Affine::translate(-0.5, -0.5))
}
