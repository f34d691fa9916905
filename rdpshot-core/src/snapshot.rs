//! The output image a session composites into, and how it is saved.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};

use crate::error::CaptureError;

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

// ── Rect ─────────────────────────────────────────────────────────

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Overlap of `self` and `other`, or `None` if they do not touch.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y1 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        if x1 <= x0 as u64 || y1 <= y0 as u64 {
            return None;
        }
        Some(Rect {
            x: x0,
            y: y0,
            width: (x1 - x0 as u64) as u32,
            height: (y1 - y0 as u64) as u32,
        })
    }
}

// ── OutputImage ──────────────────────────────────────────────────

/// Fixed-size RGB canvas, black until something is drawn on it.
///
/// The dimensions are set once at construction. Every write goes through
/// [`blit`](Self::blit), which clips to the canvas, so nothing can land
/// outside `[0,width) × [0,height)`.
#[derive(Debug, Clone)]
pub struct OutputImage {
    pixels: RgbImage,
}

impl OutputImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn bounds(&self) -> Rect {
        Rect {
            x: 0,
            y: 0,
            width: self.width(),
            height: self.height(),
        }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Copy the top-left `dest.width × dest.height` region of `source` to
    /// `(dest.x, dest.y)`, overwriting whatever was there.
    ///
    /// Returns the rectangle actually written, or `None` when nothing of
    /// `dest` falls inside both the canvas and the source.
    pub fn blit(&mut self, dest: Rect, source: &RgbImage) -> Option<Rect> {
        let drawable = Rect {
            x: dest.x,
            y: dest.y,
            width: dest.width.min(source.width()),
            height: dest.height.min(source.height()),
        };
        let clipped = drawable.intersect(&self.bounds())?;

        // Clipping only ever trims the right/bottom edges since the canvas
        // origin is (0, 0), so the source offset stays at zero.
        let bpp = 3usize;
        let row_bytes = clipped.width as usize * bpp;
        let src_stride = source.width() as usize * bpp;
        let dst_stride = self.width() as usize * bpp;
        let src = source.as_raw();
        let dst: &mut [u8] = &mut self.pixels;

        for row in 0..clipped.height as usize {
            let s = row * src_stride;
            let d = (clipped.y as usize + row) * dst_stride + clipped.x as usize * bpp;
            dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }

        Some(clipped)
    }

    /// Write the image to `path`.
    ///
    /// The format follows the file extension; JPEG (the default for unknown
    /// extensions) uses `jpeg_quality`.
    pub fn save(&self, path: &Path, jpeg_quality: u8) -> Result<(), CaptureError> {
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);
        if format != ImageFormat::Jpeg {
            return self
                .pixels
                .save_with_format(path, format)
                .map_err(|source| CaptureError::Persist {
                    path: path.to_path_buf(),
                    source,
                });
        }

        let file = File::create(path).map_err(|source| CaptureError::PersistIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, jpeg_quality.clamp(1, 100))
            .write_image(
                self.pixels.as_raw(),
                self.width(),
                self.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|source| CaptureError::Persist {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(|source| CaptureError::PersistIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
