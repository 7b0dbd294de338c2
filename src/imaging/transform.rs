//! The transform engine: every pixel-level edit the editor can make.
//!
//! Each call decodes the source through the [`ResourceTracker`], renders one
//! [`TransformOp`] and encodes a square JPEG no larger than
//! [`OutputParams::max_dimension`]. The decoded image lives in an
//! [`ImageHandle`](super::resources::ImageHandle) for exactly the duration of
//! the call.
//!
//! ## Two rendering paths
//!
//! | Op | Path |
//! |---|---|
//! | `Normalize`, `OrientationCorrect`, `Rotate90` | exact pixel remap, then center square |
//! | `Flip`, `Rotate`, `Composite` at a multiple of 90° | exact pixel remap, then center square |
//! | `Rotate`, `Composite` at any other angle | one affine warp into the inscribed square |
//! | `Crop`, `Fit` | one affine warp of the region onto the frame |
//!
//! Affine renders sample bilinearly via `imageproc`'s `warp_into_with` at up
//! to four times the output side, then resample down with Lanczos3. Rotation
//! keeps the largest centered square that contains no fill, so only `Fit`
//! ever shows the background color.

use super::calculations::{
    Affine, center_square, clamp_crop_region, inscribed_square_side, region_is_valid,
    region_to_output, render_sides, rotation_to_output, to_pixel_index_space,
};
use super::orientation::{Orientation, read_orientation};
use super::params::{OutputParams, Quality, TransformOp};
use super::resources::{RawSource, ResourceTracker};
use crate::types::{Direction, Region, normalize_degrees};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageEncoder, ImageReader, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, warp_into_with};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("transform collapses the image")]
    Degenerate,
}

impl TransformError {
    /// Short reason suitable for showing to the person editing.
    pub fn user_reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "the photo could not be read",
            Self::Encode(_) => "the edited photo could not be saved",
            Self::InvalidRegion(_) => "the selected area is not usable",
            Self::Degenerate => "the edit would leave nothing to show",
        }
    }
}

/// Applies [`TransformOp`]s to encoded rasters.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    tracker: Arc<ResourceTracker>,
    params: OutputParams,
}

impl TransformEngine {
    pub fn new(tracker: Arc<ResourceTracker>, params: OutputParams) -> Self {
        Self { tracker, params }
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn params(&self) -> &OutputParams {
        &self.params
    }

    /// Decode `source`, apply `op`, and encode the square result.
    pub fn apply(&self, source: &[u8], op: &TransformOp) -> Result<Vec<u8>, TransformError> {
        let handle = self.tracker.acquire(RawSource::Encoded(source))?;
        let rendered = self.render(&handle, op)?;
        drop(handle);
        debug!(?op, side = rendered.width(), "rendered transform");
        encode_jpeg(&rendered, self.params.quality)
    }

    /// Bring a freshly acquired photo upright and into display form.
    ///
    /// The orientation is read from the source's own metadata and corrected
    /// exactly once here; the returned raster carries no orientation tag.
    pub fn ingest(&self, source: &[u8]) -> Result<(Vec<u8>, Orientation), TransformError> {
        let orientation = read_orientation(source);
        let display = self.apply(source, &TransformOp::OrientationCorrect(orientation))?;
        Ok((display, orientation))
    }

    /// Whether `bytes` is already a square raster within the side cap.
    ///
    /// Reads only the header.
    pub fn conforms(&self, bytes: &[u8]) -> bool {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .is_some_and(|(w, h)| w == h && w <= self.params.max_dimension)
    }

    /// Render `op` over an already decoded image.
    pub fn render(
        &self,
        image: &DynamicImage,
        op: &TransformOp,
    ) -> Result<RgbImage, TransformError> {
        let source = image.to_rgb8();
        if source.width() == 0 || source.height() == 0 {
            return Err(TransformError::Degenerate);
        }
        match *op {
            TransformOp::Normalize => Ok(self.square_exact(source)),
            TransformOp::OrientationCorrect(orientation) => {
                let upright = orientation.apply(DynamicImage::ImageRgb8(source)).into_rgb8();
                Ok(self.square_exact(upright))
            }
            TransformOp::Rotate90(direction) => {
                let turned = match direction {
                    Direction::Clockwise => imageops::rotate90(&source),
                    Direction::CounterClockwise => imageops::rotate270(&source),
                };
                Ok(self.square_exact(turned))
            }
            TransformOp::Rotate { degrees } => self.composite(source, false, false, degrees),
            TransformOp::Flip { x, y } => self.composite(source, x, y, 0.0),
            TransformOp::Composite {
                flip_x,
                flip_y,
                degrees,
            } => self.composite(source, flip_x, flip_y, degrees),
            TransformOp::Crop(region) => {
                check_region(&region)?;
                let clamped = clamp_crop_region(&region, source.width(), source.height());
                self.region(&source, &clamped, true)
            }
            TransformOp::Fit(region) => {
                check_region(&region)?;
                self.region(&source, &region, false)
            }
        }
    }

    /// Flips first, then a clockwise rotation about the center.
    fn composite(
        &self,
        source: RgbImage,
        flip_x: bool,
        flip_y: bool,
        degrees: f32,
    ) -> Result<RgbImage, TransformError> {
        if !degrees.is_finite() {
            return Err(TransformError::Degenerate);
        }
        if let Some(turns) = quarter_turns(degrees) {
            let mut img = source;
            if flip_x {
                imageops::flip_horizontal_in_place(&mut img);
            }
            if flip_y {
                imageops::flip_vertical_in_place(&mut img);
            }
            let turned = match turns {
                1 => imageops::rotate90(&img),
                2 => imageops::rotate180(&img),
                3 => imageops::rotate270(&img),
                _ => img,
            };
            return Ok(self.square_exact(turned));
        }

        let source = at_least_two_pixels(source);
        let (w, h) = source.dimensions();
        let degrees = f64::from(degrees);
        let side = inscribed_square_side(f64::from(w), f64::from(h), degrees);
        let (render, output) = render_sides(side, self.params.max_dimension);
        let map = rotation_to_output(w, h, flip_x, flip_y, degrees, side, render);
        let rendered = self.warp(&source, &map, render, true)?;
        Ok(downsample(rendered, output))
    }

    /// Map a square source region onto the full frame.
    ///
    /// With `clamp_edges` samples never leave the source; otherwise samples
    /// past the edge take the background color.
    fn region(
        &self,
        source: &RgbImage,
        region: &Region,
        clamp_edges: bool,
    ) -> Result<RgbImage, TransformError> {
        let (render, output) = render_sides(f64::from(region.size), self.params.max_dimension);
        let map = region_to_output(region, render);
        let widened;
        let source = if source.width() < 2 || source.height() < 2 {
            widened = at_least_two_pixels(source.clone());
            &widened
        } else {
            source
        };
        let rendered = self.warp(source, &map, render, clamp_edges)?;
        Ok(downsample(rendered, output))
    }

    /// Render `source` through `map` (source → output, continuous coordinates)
    /// into a `side × side` frame.
    fn warp(
        &self,
        source: &RgbImage,
        map: &Affine,
        side: u32,
        clamp_edges: bool,
    ) -> Result<RgbImage, TransformError> {
        let inverse = to_pixel_index_space(map)
            .invert()
            .ok_or(TransformError::Degenerate)?;
        let background = Rgb(self.params.background);
        // bilinear needs a right/bottom neighbour inside the image
        let max_x = (source.width() as f32 - 1.001).max(0.0);
        let max_y = (source.height() as f32 - 1.001).max(0.0);
        let mut out = RgbImage::from_pixel(side, side, background);
        warp_into_with(
            source,
            move |x, y| {
                let (sx, sy) = inverse.apply(f64::from(x), f64::from(y));
                let (sx, sy) = (sx as f32, sy as f32);
                if clamp_edges {
                    (sx.max(0.0).min(max_x), sy.max(0.0).min(max_y))
                } else {
                    (sx, sy)
                }
            },
            Interpolation::Bilinear,
            background,
            &mut out,
        );
        Ok(out)
    }

    /// Keep the centered square and cap its side, without resampling when
    /// it already fits.
    fn square_exact(&self, img: RgbImage) -> RgbImage {
        let (w, h) = img.dimensions();
        let square = center_square(w, h);
        let side = square.size as u32;
        let cropped = if w == h {
            img
        } else {
            imageops::crop_imm(&img, square.x as u32, square.y as u32, side, side).to_image()
        };
        downsample(cropped, side.min(self.params.max_dimension))
    }
}

/// Number of clockwise quarter turns if `degrees` is a multiple of 90.
fn quarter_turns(degrees: f32) -> Option<u32> {
    let turns = normalize_degrees(degrees) / 90.0;
    let rounded = turns.round();
    ((turns - rounded).abs() < 1e-4).then_some(rounded as u32 % 4)
}

fn check_region(region: &Region) -> Result<(), TransformError> {
    if region_is_valid(region) {
        Ok(())
    } else {
        Err(TransformError::InvalidRegion(format!(
            "x={} y={} size={}",
            region.x, region.y, region.size
        )))
    }
}

/// Single-pixel rows or columns can't be sampled bilinearly.
fn at_least_two_pixels(img: RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    if w >= 2 && h >= 2 {
        return img;
    }
    imageops::resize(&img, w.max(2), h.max(2), FilterType::Nearest)
}

fn downsample(img: RgbImage, side: u32) -> RgbImage {
    if img.width() == side && img.height() == side {
        img
    } else {
        imageops::resize(&img, side, side, FilterType::Lanczos3)
    }
}

/// Encode an RGB raster as baseline JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: Quality) -> Result<Vec<u8>, TransformError> {
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality.value() as u8)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{encode_png, exif_block, jpeg_with_app1, quadrant_image, solid_image};

    const RED: [u8; 3] = [220, 30, 30];
    const BLUE: [u8; 3] = [30, 30, 220];

    fn engine() -> TransformEngine {
        TransformEngine::new(Arc::new(ResourceTracker::new()), OutputParams::default())
    }

    fn decode(bytes: &[u8]) -> RgbImage {
        image::load_from_memory(bytes).unwrap().to_rgb8()
    }

    fn is_near(pixel: &Rgb<u8>, expected: [u8; 3]) -> bool {
        pixel
            .0
            .iter()
            .zip(expected)
            .all(|(&a, b)| (i16::from(a) - i16::from(b)).abs() < 40)
    }

    /// Left half red, right half blue.
    fn halves(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 { Rgb(RED) } else { Rgb(BLUE) }
        });
        encode_png(&img)
    }

    #[test]
    fn normalize_landscape_to_capped_square() {
        let out = engine()
            .apply(&solid_image(1000, 800, BLUE), &TransformOp::Normalize)
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.dimensions(), (512, 512));
    }

    #[test]
    fn small_sources_are_not_upscaled() {
        let out = engine()
            .apply(&solid_image(100, 60, BLUE), &TransformOp::Normalize)
            .unwrap();
        assert_eq!(decode(&out).dimensions(), (60, 60));
    }

    #[test]
    fn output_is_jpeg() {
        let out = engine()
            .apply(&solid_image(40, 40, RED), &TransformOp::Normalize)
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn orientation_correct_rotates_clockwise() {
        // left half red; after a clockwise quarter turn the top is red
        let out = engine()
            .apply(
                &halves(60, 40),
                &TransformOp::OrientationCorrect(Orientation::Rotate90),
            )
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.dimensions(), (40, 40));
        assert!(is_near(img.get_pixel(20, 4), RED));
        assert!(is_near(img.get_pixel(20, 36), BLUE));
    }

    #[test]
    fn ingest_reads_orientation_from_metadata() {
        let plain = {
            let img = RgbImage::from_fn(60, 40, |x, _| {
                if x < 30 { Rgb(RED) } else { Rgb(BLUE) }
            });
            encode_jpeg(&img, Quality::new(95)).unwrap()
        };
        let tagged = jpeg_with_app1(&plain, &exif_block(6, false));
        let (display, orientation) = engine().ingest(&tagged).unwrap();
        assert_eq!(orientation, Orientation::Rotate90);
        let img = decode(&display);
        assert_eq!(img.dimensions(), (40, 40));
        assert!(is_near(img.get_pixel(20, 4), RED));
    }

    #[test]
    fn rotate90_moves_top_left_to_top_right() {
        let out = engine()
            .apply(
                &quadrant_image(64, RED, BLUE),
                &TransformOp::Rotate90(Direction::Clockwise),
            )
            .unwrap();
        let img = decode(&out);
        assert!(is_near(img.get_pixel(56, 8), RED));
        assert!(is_near(img.get_pixel(8, 8), BLUE));
    }

    #[test]
    fn composite_quarter_turn_matches_rotate90() {
        let source = quadrant_image(64, RED, BLUE);
        let e = engine();
        let a = e
            .apply(&source, &TransformOp::Rotate90(Direction::CounterClockwise))
            .unwrap();
        let b = e
            .apply(
                &source,
                &TransformOp::Composite {
                    flip_x: false,
                    flip_y: false,
                    degrees: -90.0,
                },
            )
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flip_x_mirrors() {
        let out = engine()
            .apply(&halves(40, 40), &TransformOp::Flip { x: true, y: false })
            .unwrap();
        let img = decode(&out);
        assert!(is_near(img.get_pixel(4, 20), BLUE));
        assert!(is_near(img.get_pixel(36, 20), RED));
    }

    #[test]
    fn free_rotation_keeps_inscribed_square_without_fill() {
        let out = engine()
            .apply(&solid_image(400, 400, BLUE), &TransformOp::Rotate { degrees: 30.0 })
            .unwrap();
        let img = decode(&out);
        // 400 / (cos 30° + sin 30°) ≈ 292.8
        assert_eq!(img.dimensions(), (293, 293));
        for (x, y) in [(0, 0), (292, 0), (0, 292), (292, 292), (146, 146)] {
            assert!(is_near(img.get_pixel(x, y), BLUE), "fill at ({x},{y})");
        }
    }

    #[test]
    fn crop_selects_region() {
        let out = engine()
            .apply(
                &quadrant_image(200, RED, BLUE),
                &TransformOp::Crop(Region::new(0.0, 0.0, 100.0)),
            )
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.dimensions(), (100, 100));
        for (x, y) in [(5, 5), (50, 50), (94, 94)] {
            assert!(is_near(img.get_pixel(x, y), RED));
        }
    }

    #[test]
    fn crop_clamps_region_inside_source() {
        let out = engine()
            .apply(
                &solid_image(200, 200, BLUE),
                &TransformOp::Crop(Region::new(150.0, 150.0, 100.0)),
            )
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.dimensions(), (100, 100));
        assert!(is_near(img.get_pixel(95, 95), BLUE));
    }

    #[test]
    fn fit_fills_outside_with_background() {
        let out = engine()
            .apply(
                &solid_image(100, 100, BLUE),
                &TransformOp::Fit(Region::new(-50.0, -50.0, 200.0)),
            )
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.dimensions(), (200, 200));
        assert!(is_near(img.get_pixel(5, 5), [255, 255, 255]));
        assert!(is_near(img.get_pixel(100, 100), BLUE));
    }

    #[test]
    fn invalid_region_rejected() {
        let e = engine();
        let source = solid_image(50, 50, RED);
        for op in [
            TransformOp::Crop(Region::new(0.0, 0.0, 0.0)),
            TransformOp::Fit(Region::new(f32::NAN, 0.0, 10.0)),
        ] {
            assert!(matches!(
                e.apply(&source, &op),
                Err(TransformError::InvalidRegion(_))
            ));
        }
        assert_eq!(e.tracker().live(), 0);
    }

    #[test]
    fn decode_failure_reports_and_tracks_nothing() {
        let e = engine();
        let err = e.apply(b"not an image", &TransformOp::Normalize).unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
        assert_eq!(e.tracker().live(), 0);
    }

    #[test]
    fn handles_released_after_every_apply() {
        let e = engine();
        let source = solid_image(80, 50, RED);
        for op in [
            TransformOp::Normalize,
            TransformOp::Rotate { degrees: 12.5 },
            TransformOp::Fit(Region::new(-10.0, -10.0, 70.0)),
        ] {
            e.apply(&source, &op).unwrap();
        }
        assert_eq!(e.tracker().live(), 0);
        assert_eq!(e.tracker().acquired(), 3);
        assert_eq!(e.tracker().released(), 3);
    }

    #[test]
    fn one_pixel_source_survives_rotation() {
        let out = engine()
            .apply(&solid_image(1, 1, RED), &TransformOp::Rotate { degrees: 45.0 })
            .unwrap();
        let img = decode(&out);
        assert_eq!(img.width(), img.height());
    }

    #[test]
    fn conforms_checks_square_and_cap() {
        let e = engine();
        assert!(e.conforms(&solid_image(512, 512, RED)));
        assert!(!e.conforms(&solid_image(513, 513, RED)));
        assert!(!e.conforms(&solid_image(100, 80, RED)));
        assert!(!e.conforms(b"junk"));
    }

    #[test]
    fn quarter_turn_detection() {
        assert_eq!(quarter_turns(0.0), Some(0));
        assert_eq!(quarter_turns(-90.0), Some(3));
        assert_eq!(quarter_turns(450.0), Some(1));
        assert_eq!(quarter_turns(45.0), None);
    }
}
