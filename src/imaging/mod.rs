//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` with format sniffing |
//! | **Orientation** | custom EXIF reader (JPEG APP1 + bare TIFF) |
//! | **Rotate / crop / fit** | `imageproc` affine warp, bilinear |
//! | **Downsample** | `image::imageops::resize`, Lanczos3 |
//! | **Encode** | `image::codecs::jpeg::JpegEncoder` |
//! | **Fingerprint** | average hash over a luma grid |
//!
//! The module is split into:
//! - **Calculations**: Pure geometry (affine maps, inscribed squares, regions)
//! - **Parameters**: Data structures describing image operations
//! - **Resources**: Scoped ownership of decoded images
//! - **Transform**: The engine that renders one operation per call
//! - **Orientation** and **Phash**: metadata and similarity readers

pub mod calculations;
pub mod orientation;
pub mod params;
pub mod phash;
pub mod resources;
pub mod transform;

pub use orientation::{Orientation, read_orientation};
pub use params::{OutputParams, Quality, TransformOp};
pub use phash::{Fingerprint, HashEngine, distance};
pub use resources::{ImageHandle, RawSource, ResourceTracker};
pub use transform::{TransformEngine, TransformError};
