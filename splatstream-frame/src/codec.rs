//! Wire encodings for rendered frames
//!
//! The primary channel carries raw interleaved RGB (row-major, 3 bytes per
//! pixel). The broadcast channel carries a compressed image, base64-encoded
//! once it reaches the event layer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::{BYTES_PER_PIXEL, DEFAULT_JPEG_QUALITY};

/// Compressed image format used on the broadcast channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

/// A frame in one of its wire representations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    /// Interleaved 8-bit RGB, exactly `width * height * 3` bytes
    Raw {
        width: u32,
        height: u32,
        bytes: Vec<u8>,
    },

    /// Compressed image bytes
    Compressed {
        format: ImageFormat,
        width: u32,
        height: u32,
        bytes: Vec<u8>,
    },
}

impl EncodedFrame {
    pub fn bytes(&self) -> &[u8] {
        match self {
            EncodedFrame::Raw { bytes, .. } | EncodedFrame::Compressed { bytes, .. } => bytes,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            EncodedFrame::Raw { width, height, .. }
            | EncodedFrame::Compressed { width, height, .. } => (*width, *height),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Compression format, `None` for raw frames
    pub fn format(&self) -> Option<ImageFormat> {
        match self {
            EncodedFrame::Raw { .. } => None,
            EncodedFrame::Compressed { format, .. } => Some(*format),
        }
    }

    /// Standard base64 of the frame bytes (browser payload)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes())
    }
}

/// Encodes rasters for both channels
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    format: ImageFormat,
    jpeg_quality: u8,
}

impl FrameEncoder {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Set JPEG quality (clamped to 1..=100)
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Raw RGB bytes for the primary channel (takes the raster, no copy)
    pub fn encode_raw(image: RgbImage) -> EncodedFrame {
        let (width, height) = image.dimensions();
        EncodedFrame::Raw {
            width,
            height,
            bytes: image.into_raw(),
        }
    }

    /// Compressed bytes for the broadcast channel
    pub fn compress(&self, image: &RgbImage) -> Result<EncodedFrame> {
        let mut bytes = Vec::new();

        match self.format {
            ImageFormat::Jpeg => {
                image.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality))?
            }
            ImageFormat::Png => image.write_with_encoder(PngEncoder::new(&mut bytes))?,
        }

        tracing::trace!(
            "Compressed {}x{} frame to {} bytes ({})",
            image.width(),
            image.height(),
            bytes.len(),
            self.format.as_str()
        );

        Ok(EncodedFrame::Compressed {
            format: self.format,
            width: image.width(),
            height: image.height(),
            bytes,
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(ImageFormat::default())
    }
}

/// Build a raster from interleaved RGB bytes
pub fn rgb_from_interleaved(bytes: Vec<u8>, width: u32, height: u32) -> Result<RgbImage> {
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    let actual = bytes.len();
    RgbImage::from_raw(width, height, bytes).ok_or(FrameError::SizeMismatch { expected, actual })
}

/// Build a raster from a planar `(3, H, W)` float image in `[0, 1]`
///
/// Values are clamped, scaled by 255 and truncated, matching how the renderer
/// converts its output tensor to bytes.
pub fn rgb_from_planar_f32(planes: &[f32], width: u32, height: u32) -> Result<RgbImage> {
    let plane = width as usize * height as usize;
    let expected = plane * BYTES_PER_PIXEL;
    if planes.len() != expected {
        return Err(FrameError::SizeMismatch {
            expected,
            actual: planes.len(),
        });
    }

    let mut bytes = Vec::with_capacity(expected);
    for idx in 0..plane {
        for channel in 0..BYTES_PER_PIXEL {
            let value = planes[channel * plane + idx].clamp(0.0, 1.0);
            bytes.push((value * 255.0) as u8);
        }
    }

    rgb_from_interleaved(bytes, width, height)
}
