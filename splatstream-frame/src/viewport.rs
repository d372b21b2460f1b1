//! Viewport adaptation
//!
//! Fits a rendered raster of any size into the viewport a viewer asked for.
//! Oversized sources are decimated (every `step`-th row and column, no
//! filtering), then centered on a zeroed background. Nothing is ever
//! upsampled or stretched, so the aspect ratio of the source is kept exactly
//! and undersized sources are letterboxed.

use image::RgbImage;

use crate::error::{FrameError, Result};
use crate::BYTES_PER_PIXEL;

/// Where an adapted source lands inside the destination viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Decimation step (1 = no decimation)
    pub step: u32,
    /// Width of the source after decimation
    pub width: u32,
    /// Height of the source after decimation
    pub height: u32,
    /// Row offset of the source inside the destination
    pub top: u32,
    /// Column offset of the source inside the destination
    pub left: u32,
}

/// Compute decimation step and centering offsets
///
/// `step = ceil(max(src_h / dst_h, src_w / dst_w))` whenever the source is
/// larger than the destination in either dimension, otherwise 1.
/// Destination dimensions must be non-zero.
pub fn placement(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Placement {
    let step = if src_width > dst_width || src_height > dst_height {
        src_height
            .div_ceil(dst_height)
            .max(src_width.div_ceil(dst_width))
            .max(1)
    } else {
        1
    };

    let width = src_width.div_ceil(step);
    let height = src_height.div_ceil(step);

    Placement {
        step,
        width,
        height,
        top: (dst_height - height) / 2,
        left: (dst_width - width) / 2,
    }
}

/// Adapt `source` to exactly `width` x `height`
///
/// Returns an error only for a zero-sized viewport; callers treat that case as
/// "not viewing" before they get here.
pub fn adapt(source: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidViewport { width, height });
    }

    if source.dimensions() == (width, height) {
        return Ok(source.clone());
    }

    let mut out = RgbImage::new(width, height);
    if source.width() == 0 || source.height() == 0 {
        return Ok(out);
    }

    let fit = placement(source.width(), source.height(), width, height);
    let step = fit.step as usize;
    let src_stride = source.width() as usize * BYTES_PER_PIXEL;
    let dst_stride = width as usize * BYTES_PER_PIXEL;
    let row_bytes = fit.width as usize * BYTES_PER_PIXEL;

    let src: &[u8] = source.as_raw();
    let dst: &mut [u8] = &mut out;

    for row in 0..fit.height as usize {
        let src_row = row * step * src_stride;
        let dst_row = (fit.top as usize + row) * dst_stride + fit.left as usize * BYTES_PER_PIXEL;

        if step == 1 {
            dst[dst_row..dst_row + row_bytes].copy_from_slice(&src[src_row..src_row + row_bytes]);
            continue;
        }

        for col in 0..fit.width as usize {
            let s = src_row + col * step * BYTES_PER_PIXEL;
            let d = dst_row + col * BYTES_PER_PIXEL;
            dst[d..d + BYTES_PER_PIXEL].copy_from_slice(&src[s..s + BYTES_PER_PIXEL]);
        }
    }

    Ok(out)
}
