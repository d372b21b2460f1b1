//! splatstream frame handling
//!
//! Everything the gateway needs to turn a rendered raster into bytes on the wire.
//!
//! ## Architecture
//!
//! ```text
//! Renderer output (RgbImage or planar f32)
//!   │
//!   ├─> viewport::adapt  -> negotiated viewer size (decimate + center)
//!   │     │
//!   │     └─> FrameEncoder::encode_raw -> primary channel (raw RGB)
//!   │
//!   └─> FrameEncoder::compress -> FrameWriter::store -> FrameReader (broadcast)
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod viewport;

pub use buffer::{frame_buffer, FrameReader, FrameSource, FrameWriter, SequencedFrame};
pub use codec::{rgb_from_interleaved, rgb_from_planar_f32, EncodedFrame, FrameEncoder, ImageFormat};
pub use error::{FrameError, Result};
pub use viewport::{adapt, placement, Placement};

/// Re-export of the raster type used throughout the workspace
pub use image::RgbImage;

/// Bytes per pixel of an interleaved RGB raster
pub const BYTES_PER_PIXEL: usize = 3;

/// Default JPEG quality for broadcast frames
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
