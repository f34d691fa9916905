//! Remote bitmap updates and their conversion to local RGB pixels.
//!
//! An update carries the destination rectangle on the remote screen
//! (inclusive bounds) and a bitmap that is at least that large. Bitmaps
//! arrive the way the remote display sends them: rows bottom-up, each row
//! padded to a 4-byte boundary, little-endian pixels.
//!
//! ```text
//! payload row 0  ──► output row height-1
//! payload row 1  ──► output row height-2
//! ...
//! ```

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::snapshot::Rect;

/// Largest raw bitmap, in bytes, that [`decode`] will inflate or convert.
pub const MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

// ── RemotePixelFormat ────────────────────────────────────────────

/// Pixel layouts a remote bitmap may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemotePixelFormat {
    /// 15 bpp packed in a u16: `0RRRRRGG GGGBBBBB`.
    Rgb555,
    /// 16 bpp packed in a u16: `RRRRRGGG GGGBBBBB`.
    Rgb565,
    /// 3 bytes per pixel: Blue, Green, Red.
    Bgr24,
    /// 4 bytes per pixel: Blue, Green, Red, unused.
    Bgrx32,
}

impl RemotePixelFormat {
    pub fn from_bits_per_pixel(bpp: u8) -> Result<Self, CaptureError> {
        match bpp {
            15 => Ok(Self::Rgb555),
            16 => Ok(Self::Rgb565),
            24 => Ok(Self::Bgr24),
            32 => Ok(Self::Bgrx32),
            other => Err(CaptureError::UnsupportedBitsPerPixel(other)),
        }
    }

    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb555 | Self::Rgb565 => 2,
            Self::Bgr24 => 3,
            Self::Bgrx32 => 4,
        }
    }

    /// Row pitch in bytes for a bitmap `width` pixels wide.
    pub const fn row_stride(self, width: u32) -> u64 {
        (width as u64 * self.bytes_per_pixel() as u64).div_ceil(4) * 4
    }

    fn to_rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            Self::Rgb555 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                [
                    expand5((v >> 10) as u8 & 0x1f),
                    expand5((v >> 5) as u8 & 0x1f),
                    expand5(v as u8 & 0x1f),
                ]
            }
            Self::Rgb565 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                let g = (v >> 5) as u8 & 0x3f;
                [
                    expand5((v >> 11) as u8 & 0x1f),
                    (g << 2) | (g >> 4),
                    expand5(v as u8 & 0x1f),
                ]
            }
            Self::Bgr24 | Self::Bgrx32 => [px[2], px[1], px[0]],
        }
    }
}

fn expand5(c: u8) -> u8 {
    (c << 3) | (c >> 2)
}

// ── BitmapUpdate ─────────────────────────────────────────────────

/// One rectangle of new pixel data pushed by the remote desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapUpdate {
    /// Left edge of the destination, inclusive.
    pub dest_left: u32,
    /// Top edge of the destination, inclusive.
    pub dest_top: u32,
    /// Right edge of the destination, inclusive.
    pub dest_right: u32,
    /// Bottom edge of the destination, inclusive.
    pub dest_bottom: u32,
    /// Bitmap width in pixels (may exceed the destination width).
    pub width: u32,
    /// Bitmap height in pixels.
    pub height: u32,
    /// Colour depth: 15, 16, 24 or 32.
    pub bits_per_pixel: u8,
    /// Payload is zstd-compressed.
    pub compressed: bool,
    /// Pixel payload.
    pub data: Vec<u8>,
}

impl BitmapUpdate {
    /// Destination rectangle on the remote screen.
    ///
    /// Inverted edges, or a span that does not fit in a `u32`, are invalid.
    pub fn dest_rect(&self) -> Result<Rect, CaptureError> {
        let span = |lo: u32, hi: u32| hi.checked_sub(lo).and_then(|d| d.checked_add(1));
        match (
            span(self.dest_left, self.dest_right),
            span(self.dest_top, self.dest_bottom),
        ) {
            (Some(width), Some(height)) => Ok(Rect {
                x: self.dest_left,
                y: self.dest_top,
                width,
                height,
            }),
            _ => Err(CaptureError::InvalidRectangle {
                left: self.dest_left,
                top: self.dest_top,
                right: self.dest_right,
                bottom: self.dest_bottom,
            }),
        }
    }

    /// Pack an RGB image as a 32 bpp update placed at `(left, top)`.
    ///
    /// This is the layout a server sends; it is what the loopback test
    /// peers use to feed the compositor.
    pub fn from_rgb(
        left: u32,
        top: u32,
        image: &RgbImage,
        compressed: bool,
    ) -> Result<Self, CaptureError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CaptureError::Other("empty bitmap".into()));
        }

        let (Some(right), Some(bottom)) = (left.checked_add(width - 1), top.checked_add(height - 1))
        else {
            return Err(CaptureError::InvalidRectangle {
                left,
                top,
                right: u32::MAX,
                bottom: u32::MAX,
            });
        };

        let format = RemotePixelFormat::Bgrx32;
        let stride = format.row_stride(width) as usize;
        let mut raw = vec![0u8; stride * height as usize];
        for (row_index, row) in raw.chunks_exact_mut(stride).enumerate() {
            let y = height - 1 - row_index as u32;
            for x in 0..width {
                let [r, g, b] = image.get_pixel(x, y).0;
                let off = x as usize * 4;
                row[off..off + 4].copy_from_slice(&[b, g, r, 0]);
            }
        }

        let data = if compressed {
            zstd::bulk::compress(&raw, 3).map_err(|e| CaptureError::Decompress(e.to_string()))?
        } else {
            raw
        };

        Ok(Self {
            dest_left: left,
            dest_top: top,
            dest_right: right,
            dest_bottom: bottom,
            width,
            height,
            bits_per_pixel: 32,
            compressed,
            data,
        })
    }
}

// ── Decoding ─────────────────────────────────────────────────────

/// Convert an update's bitmap into a top-down RGB image of
/// `update.width × update.height`.
///
/// The declared size is checked against [`MAX_DECODED_BYTES`] before
/// anything is allocated or inflated.
pub fn decode(update: &BitmapUpdate) -> Result<RgbImage, CaptureError> {
    let format = RemotePixelFormat::from_bits_per_pixel(update.bits_per_pixel)?;
    let stride = format.row_stride(update.width);
    let size = stride
        .checked_mul(u64::from(update.height))
        .unwrap_or(u64::MAX);
    if size > MAX_DECODED_BYTES as u64 {
        return Err(CaptureError::BitmapTooLarge {
            width: update.width,
            height: update.height,
            size,
            max: MAX_DECODED_BYTES,
        });
    }
    let stride = stride as usize;
    let expected = size as usize;

    let inflated;
    let raw: &[u8] = if update.compressed {
        inflated = zstd::bulk::decompress(&update.data, expected)
            .map_err(|e| CaptureError::Decompress(e.to_string()))?;
        &inflated
    } else {
        &update.data
    };

    if raw.len() < expected {
        return Err(CaptureError::BitmapTooShort {
            expected,
            actual: raw.len(),
        });
    }

    let bpp = format.bytes_per_pixel();
    let mut out = RgbImage::new(update.width, update.height);
    if expected == 0 {
        // Zero width or height: nothing to convert.
        return Ok(out);
    }

    for (row_index, row) in raw[..expected].chunks_exact(stride).enumerate() {
        let y = update.height - 1 - row_index as u32;
        for x in 0..update.width {
            let off = x as usize * bpp;
            out.put_pixel(x, y, image::Rgb(format.to_rgb(&row[off..off + bpp])));
        }
    }

    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_update(width: u32, height: u32, bpp: u8, data: Vec<u8>) -> BitmapUpdate {
        BitmapUpdate {
            dest_left: 0,
            dest_top: 0,
            dest_right: width - 1,
            dest_bottom: height - 1,
            width,
            height,
            bits_per_pixel: bpp,
            compressed: false,
            data,
        }
    }

    #[test]
    fn row_stride_pads_to_four_bytes() {
        assert_eq!(RemotePixelFormat::Bgr24.row_stride(3), 12);
        assert_eq!(RemotePixelFormat::Bgr24.row_stride(1), 4);
        assert_eq!(RemotePixelFormat::Rgb565.row_stride(3), 8);
        assert_eq!(RemotePixelFormat::Bgrx32.row_stride(3), 12);
    }

    #[test]
    fn rows_are_flipped() {
        // 1×2, 32 bpp: bottom row red, top row blue.
        let data = vec![0, 0, 0xff, 0, 0xff, 0, 0, 0];
        let img = decode(&raw_update(1, 2, 32, data)).unwrap();
        assert_eq!(img.get_pixel(0, 1).0, [0xff, 0, 0]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0xff]);
    }

    #[test]
    fn decodes_24bpp_with_padding() {
        // 1×1 pixel, 3 bytes + 1 pad.
        let img = decode(&raw_update(1, 1, 24, vec![0x10, 0x20, 0x30, 0xaa])).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0x30, 0x20, 0x10]);
    }

    #[test]
    fn decodes_16bpp_white_and_red() {
        let white = 0xffffu16.to_le_bytes();
        let red = 0xf800u16.to_le_bytes();
        let data = vec![white[0], white[1], red[0], red[1]];
        let img = decode(&raw_update(2, 1, 16, data)).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0xff, 0xff, 0xff]);
        assert_eq!(img.get_pixel(1, 0).0, [0xff, 0, 0]);
    }

    #[test]
    fn decodes_15bpp_green() {
        let green = 0x03e0u16.to_le_bytes();
        let data = vec![green[0], green[1], 0, 0];
        let img = decode(&raw_update(1, 1, 15, data)).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0xff, 0]);
    }

    #[test]
    fn rejects_unknown_depth() {
        let err = decode(&raw_update(1, 1, 8, vec![0; 4])).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedBitsPerPixel(8)));
    }

    #[test]
    fn rejects_short_payload() {
        let err = decode(&raw_update(4, 4, 32, vec![0; 10])).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::BitmapTooShort {
                expected: 64,
                actual: 10
            }
        ));
    }

    #[test]
    fn compressed_payload_matches_source() {
        let src = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8 * 40, y as u8 * 80, 7]));
        let update = BitmapUpdate::from_rgb(10, 20, &src, true).unwrap();
        assert!(update.compressed);
        assert_eq!(update.dest_rect().unwrap(), Rect { x: 10, y: 20, width: 5, height: 3 });
        assert_eq!(decode(&update).unwrap(), src);
    }

    #[test]
    fn garbage_compressed_payload_is_an_error() {
        let mut update = raw_update(2, 2, 32, vec![1, 2, 3, 4]);
        update.compressed = true;
        assert!(matches!(decode(&update), Err(CaptureError::Decompress(_))));
    }

    #[test]
    fn full_u32_span_is_invalid_not_overflow() {
        let mut update = raw_update(1, 1, 32, vec![0; 4]);
        update.dest_right = u32::MAX;
        assert!(matches!(
            update.dest_rect(),
            Err(CaptureError::InvalidRectangle { .. })
        ));

        update.dest_right = 0;
        update.dest_top = 0;
        update.dest_bottom = u32::MAX;
        assert!(update.dest_rect().is_err());

        // The widest representable span is still fine.
        update.dest_left = 1;
        update.dest_right = u32::MAX;
        update.dest_bottom = 0;
        assert_eq!(update.dest_rect().unwrap().width, u32::MAX);
    }

    #[test]
    fn huge_declared_size_is_rejected_before_allocating() {
        let mut update = raw_update(1, 1, 32, vec![0; 4]);
        update.width = 1 << 31;
        update.height = 1 << 31;
        assert!(matches!(
            decode(&update),
            Err(CaptureError::BitmapTooLarge { .. })
        ));

        update.width = u32::MAX;
        update.height = u32::MAX;
        assert!(matches!(
            decode(&update),
            Err(CaptureError::BitmapTooLarge { size: u64::MAX, .. })
        ));
    }

    #[test]
    fn tiny_compressed_payload_claiming_huge_bitmap_is_rejected() {
        let payload = zstd::bulk::compress(&[0u8; 16], 3).unwrap();
        let update = BitmapUpdate {
            dest_left: 0,
            dest_top: 0,
            dest_right: 9,
            dest_bottom: 9,
            width: 60000,
            height: 60000,
            bits_per_pixel: 32,
            compressed: true,
            data: payload,
        };
        assert!(matches!(
            decode(&update),
            Err(CaptureError::BitmapTooLarge { width: 60000, height: 60000, .. })
        ));
    }

    #[test]
    fn bitmap_at_the_limit_passes_the_size_check() {
        // 4096 × 4096 at 32 bpp is exactly the cap; the short payload is
        // what fails, not the declared size.
        let err = decode(&raw_update(4096, 4096, 32, vec![0; 4])).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::BitmapTooShort { expected: MAX_DECODED_BYTES, actual: 4 }
        ));
    }

    #[test]
    fn from_rgb_rejects_placement_past_u32() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1]));
        assert!(BitmapUpdate::from_rgb(u32::MAX, 0, &img, false).is_err());
        assert!(BitmapUpdate::from_rgb(u32::MAX - 1, 0, &img, false).is_ok());
    }

    #[test]
    fn inverted_rectangle_is_invalid() {
        let mut update = raw_update(2, 2, 32, vec![0; 16]);
        update.dest_left = 5;
        update.dest_right = 4;
        assert!(matches!(
            update.dest_rect(),
            Err(CaptureError::InvalidRectangle { .. })
        ));
    }
}
