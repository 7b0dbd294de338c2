//! EXIF orientation decoder for JPEG (and bare TIFF) buffers.
//!
//! Reads a single field: IFD0 tag `0x0112` (Orientation), a SHORT with
//! count 1 whose value 1–8 names one of the eight dihedral transforms a
//! camera asks the viewer to apply.
//!
//! For JPEG the tag lives in an APP1 segment whose payload starts with
//! `"Exif\0\0"`, followed by a TIFF header. Other APP1 payloads (XMP,
//! extended XMP) share the marker and are skipped.
//!
//! The decoder never fails: anything missing, truncated, or malformed
//! yields [`Orientation::Identity`]. A malformed APP1 segment only abandons
//! that segment; the scan moves on to the next one.

use image::DynamicImage;

/// Image orientation as an element of the D4 dihedral group, numbered by
/// its EXIF code.
///
/// ```text
/// | Code | Orientation | Correction applied    | Swaps axes |
/// |------|-------------|-----------------------|------------|
/// | 1    | Identity    | none                  | no         |
/// | 2    | FlipH       | mirror left ↔ right   | no         |
/// | 3    | Rotate180   | 180°                  | no         |
/// | 4    | FlipV       | mirror top ↔ bottom   | no         |
/// | 5    | Transpose   | reflect main diagonal | yes        |
/// | 6    | Rotate90    | 90° clockwise         | yes        |
/// | 7    | Transverse  | reflect anti-diagonal | yes        |
/// | 8    | Rotate270   | 90° counter-clockwise | yes        |
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    #[default]
    Identity,
    FlipH,
    Rotate180,
    FlipV,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map an EXIF code to an orientation. Codes outside 1–8 are identity.
    pub fn from_code(code: u16) -> Self {
        match code {
            2 => Self::FlipH,
            3 => Self::Rotate180,
            4 => Self::FlipV,
            5 => Self::Transpose,
            6 => Self::Rotate90,
            7 => Self::Transverse,
            8 => Self::Rotate270,
            _ => Self::Identity,
        }
    }

    /// The EXIF code, 1–8.
    pub fn code(self) -> u8 {
        match self {
            Self::Identity => 1,
            Self::FlipH => 2,
            Self::Rotate180 => 3,
            Self::FlipV => 4,
            Self::Transpose => 5,
            Self::Rotate90 => 6,
            Self::Transverse => 7,
            Self::Rotate270 => 8,
        }
    }

    /// Whether the correction exchanges width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Rotate90 | Self::Transverse | Self::Rotate270
        )
    }

    /// Apply the correction so the image displays upright.
    ///
    /// These are exact pixel remaps; no resampling happens here.
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Identity => img,
            Self::FlipH => img.fliph(),
            Self::Rotate180 => img.rotate180(),
            Self::FlipV => img.flipv(),
            Self::Transpose => img.rotate90().fliph(),
            Self::Rotate90 => img.rotate90(),
            Self::Transverse => img.rotate270().fliph(),
            Self::Rotate270 => img.rotate270(),
        }
    }
}

/// Read the orientation of an encoded image. Never fails; see module docs.
pub fn read_orientation(data: &[u8]) -> Orientation {
    if data.starts_with(b"II") || data.starts_with(b"MM") {
        return tiff_orientation(data).unwrap_or_default();
    }
    JpegSegments::new(data)
        .filter(|seg| seg.marker == APP1)
        .find_map(|seg| exif_orientation(seg.payload))
        .unwrap_or_default()
}

/// Convenience: the orientation as its EXIF code (1 = identity).
pub fn read_orientation_code(data: &[u8]) -> u8 {
    read_orientation(data).code()
}

// ---------------------------------------------------------------------------
// JPEG segment scanning
// ---------------------------------------------------------------------------

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;
const TEM: u8 = 0x01;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";

/// A marker segment: the marker byte and its payload (after the length).
struct Segment<'a> {
    marker: u8,
    payload: &'a [u8],
}

/// Iterator over the marker segments preceding the compressed image data.
///
/// Stops at SOS/EOI, at a segment whose length runs past the buffer, or at
/// any byte that is not a marker where one is expected.
struct JpegSegments<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> JpegSegments<'a> {
    fn new(data: &'a [u8]) -> Self {
        let pos = if data.len() >= 2 && data[0] == 0xFF && data[1] == SOI {
            2
        } else {
            // Not a JPEG: start past the end so iteration is empty.
            data.len()
        };
        Self { data, pos }
    }
}

impl<'a> Iterator for JpegSegments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        loop {
            let data = self.data;
            if self.pos + 1 >= data.len() || data[self.pos] != 0xFF {
                return None;
            }
            let marker = data[self.pos + 1];
            match marker {
                // Fill byte: markers may be preceded by any number of 0xFF.
                0xFF => {
                    self.pos += 1;
                    continue;
                }
                // Standalone markers carry no length field.
                SOI | TEM | 0xD0..=0xD7 => {
                    self.pos += 2;
                    continue;
                }
                SOS | EOI => return None,
                _ => {}
            }

            if self.pos + 4 > data.len() {
                return None;
            }
            let len = read_u16(data, self.pos + 2, true)? as usize;
            if len < 2 {
                return None;
            }
            let start = self.pos + 4;
            let end = self.pos + 2 + len;
            if end > data.len() {
                return None;
            }
            self.pos = end;
            if end == start {
                // Zero-length payload: nothing to look at.
                continue;
            }
            return Some(Segment {
                marker,
                payload: &data[start..end],
            });
        }
    }
}

/// Orientation from an APP1 payload, or `None` if it is not a valid EXIF block.
fn exif_orientation(payload: &[u8]) -> Option<Orientation> {
    let tiff = payload.strip_prefix(EXIF_SIGNATURE)?;
    tiff_orientation(tiff)
}

// ---------------------------------------------------------------------------
// TIFF header + IFD0
// ---------------------------------------------------------------------------

const TIFF_MAGIC: u16 = 42;
const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;
const IFD_ENTRY_LEN: usize = 12;

/// Walk IFD0 of a TIFF structure and return the orientation tag, if valid.
///
/// Offsets are relative to the start of `tiff` (the byte-order mark).
fn tiff_orientation(tiff: &[u8]) -> Option<Orientation> {
    let big_endian = match tiff.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    if read_u16(tiff, 2, big_endian)? != TIFF_MAGIC {
        return None;
    }
    let ifd = read_u32(tiff, 4, big_endian)? as usize;
    let count = read_u16(tiff, ifd, big_endian)? as usize;

    for i in 0..count {
        let entry = ifd + 2 + i * IFD_ENTRY_LEN;
        let tag = read_u16(tiff, entry, big_endian)?;
        if tag != ORIENTATION_TAG {
            continue;
        }
        let typ = read_u16(tiff, entry + 2, big_endian)?;
        let n = read_u32(tiff, entry + 4, big_endian)?;
        if typ != TYPE_SHORT || n != 1 {
            return None;
        }
        // A single SHORT is stored left-aligned in the 4-byte value field.
        let value = read_u16(tiff, entry + 8, big_endian)?;
        return (1..=8)
            .contains(&value)
            .then(|| Orientation::from_code(value));
    }
    None
}

fn read_u16(data: &[u8], offset: usize, big_endian: bool) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
    Some(if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    })
}

fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{exif_block, jpeg_bytes, jpeg_with_app1, tiff_header};
    use image::{GenericImageView, RgbImage};

    #[test]
    fn every_code_roundtrips_in_both_byte_orders() {
        for code in 1..=8u16 {
            for big_endian in [true, false] {
                let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(code, big_endian));
                assert_eq!(
                    read_orientation_code(&jpeg),
                    code as u8,
                    "code {code}, big_endian {big_endian}"
                );
            }
        }
    }

    #[test]
    fn plain_jpeg_is_identity() {
        assert_eq!(read_orientation(&jpeg_bytes(8, 8)), Orientation::Identity);
    }

    #[test]
    fn empty_and_garbage_are_identity() {
        assert_eq!(read_orientation(&[]), Orientation::Identity);
        assert_eq!(read_orientation(&[0xFF]), Orientation::Identity);
        assert_eq!(read_orientation(b"not an image at all"), Orientation::Identity);
    }

    #[test]
    fn truncated_segment_is_identity() {
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(6, true));
        // cut inside the APP1 payload
        for cut in [4, 8, 12, 20, 30] {
            assert_eq!(read_orientation_code(&jpeg[..cut]), 1, "cut at {cut}");
        }
    }

    #[test]
    fn wrong_type_or_count_is_identity() {
        let mut block = exif_block(6, true);
        // type field of the single IFD entry: signature(6) + header(8) + count(2) + tag(2)
        block[6 + 8 + 2 + 2 + 1] = 4; // LONG
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &block);
        assert_eq!(read_orientation_code(&jpeg), 1);

        let mut block = exif_block(6, true);
        block[6 + 8 + 2 + 4 + 3] = 2; // count = 2
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &block);
        assert_eq!(read_orientation_code(&jpeg), 1);
    }

    #[test]
    fn out_of_range_value_is_identity() {
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(9, true));
        assert_eq!(read_orientation_code(&jpeg), 1);
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(0, false));
        assert_eq!(read_orientation_code(&jpeg), 1);
    }

    #[test]
    fn bad_magic_is_identity() {
        let mut block = exif_block(6, true);
        block[6 + 3] = 43;
        let jpeg = jpeg_with_app1(&jpeg_bytes(4, 4), &block);
        assert_eq!(read_orientation_code(&jpeg), 1);
    }

    #[test]
    fn skips_xmp_app1_and_keeps_scanning() {
        let mut xmp = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        xmp.extend_from_slice(b"<x:xmpmeta/>");
        let with_exif = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(8, false));
        // XMP is spliced in front, so the scanner meets it first
        let jpeg = jpeg_with_app1(&with_exif, &xmp);
        assert_eq!(read_orientation_code(&jpeg), 8);
    }

    #[test]
    fn malformed_exif_segment_does_not_stop_scan() {
        let mut broken = exif_block(3, true);
        broken[6] = b'X'; // byte-order mark is neither II nor MM
        let with_good = jpeg_with_app1(&jpeg_bytes(4, 4), &exif_block(5, true));
        let jpeg = jpeg_with_app1(&with_good, &broken);
        assert_eq!(read_orientation_code(&jpeg), 5);
    }

    #[test]
    fn bare_tiff_header_is_read() {
        assert_eq!(read_orientation(&tiff_header(7, false)), Orientation::Transverse);
    }

    #[test]
    fn from_code_and_code_agree() {
        for code in 1..=8u16 {
            assert_eq!(Orientation::from_code(code).code() as u16, code);
        }
        assert_eq!(Orientation::from_code(0), Orientation::Identity);
        assert_eq!(Orientation::from_code(200), Orientation::Identity);
    }

    #[test]
    fn swapping_orientations_exchange_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(6, 4));
        for code in 1..=8u16 {
            let o = Orientation::from_code(code);
            let out = o.apply(img.clone());
            let expected = if o.swaps_axes() { (4, 6) } else { (6, 4) };
            assert_eq!(out.dimensions(), expected, "{o:?}");
        }
    }

    #[test]
    fn rotate90_moves_top_left_to_top_right() {
        let mut raw = RgbImage::new(3, 2);
        raw.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        let out = Orientation::Rotate90.apply(DynamicImage::ImageRgb8(raw)).to_rgb8();
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(1, 0), &image::Rgb([255, 0, 0]));
    }
}
