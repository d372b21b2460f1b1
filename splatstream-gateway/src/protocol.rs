//! Primary channel wire protocol
//!
//! Every message is a little-endian `u32` length followed by that many bytes.
//! The service greets a new viewer with one JSON [`ViewRequest`] carrying its
//! defaults; afterwards the viewer sends one JSON [`ViewRequest`] per frame and
//! the service answers with `len + raw RGB` (omitted when there is no frame)
//! followed by `len + ASCII trailer`.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};

use crate::error::SessionError;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default upper bound for an incoming view request
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default upper bound on requested viewport pixels (4096x4096)
pub const DEFAULT_MAX_PIXELS: u64 = 4096 * 4096;

/// Row-major 4x4 identity, flattened
pub const IDENTITY: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// View matrix columns negated on receipt (Y and Z axes)
pub const VIEW_FLIP_COLUMNS: [usize; 2] = [1, 2];

/// View-projection matrix columns negated on receipt (Y axis)
pub const PROJECTION_FLIP_COLUMNS: [usize; 1] = [1];

/// Per-frame view negotiated with the viewer (also the greeting payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRequest {
    #[serde(rename = "resolution_x")]
    pub width: u32,
    #[serde(rename = "resolution_y")]
    pub height: u32,
    pub train: bool,
    pub fov_y: f64,
    pub fov_x: f64,
    pub z_near: f64,
    pub z_far: f64,
    pub shs_python: bool,
    pub rot_scale_python: bool,
    pub keep_alive: bool,
    pub scaling_modifier: f64,
    pub view_matrix: [f64; 16],
    pub view_projection_matrix: [f64; 16],
}

impl Default for ViewRequest {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1080,
            train: true,
            fov_y: 45.0,
            fov_x: 60.0,
            z_near: 0.1,
            z_far: 100.0,
            shs_python: false,
            rot_scale_python: false,
            keep_alive: true,
            scaling_modifier: 1.0,
            view_matrix: IDENTITY,
            view_projection_matrix: IDENTITY,
        }
    }
}

impl ViewRequest {
    /// Zero width or height means the viewer is not looking
    pub fn is_active(&self) -> bool {
        self.width != 0 && self.height != 0
    }

    /// Convert into the renderer's camera convention
    pub fn camera(&self) -> CameraView {
        CameraView {
            width: self.width,
            height: self.height,
            fov_x: self.fov_x,
            fov_y: self.fov_y,
            z_near: self.z_near,
            z_far: self.z_far,
            scaling_modifier: self.scaling_modifier,
            train: self.train,
            shs_python: self.shs_python,
            rot_scale_python: self.rot_scale_python,
            keep_alive: self.keep_alive,
            world_view: negate_columns(&self.view_matrix, &VIEW_FLIP_COLUMNS),
            full_projection: negate_columns(
                &self.view_projection_matrix,
                &PROJECTION_FLIP_COLUMNS,
            ),
        }
    }
}

/// Camera handed to a renderer, matrices already in renderer convention
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub width: u32,
    pub height: u32,
    pub fov_x: f64,
    pub fov_y: f64,
    pub z_near: f64,
    pub z_far: f64,
    pub scaling_modifier: f64,
    pub train: bool,
    pub shs_python: bool,
    pub rot_scale_python: bool,
    pub keep_alive: bool,
    pub world_view: [f64; 16],
    pub full_projection: [f64; 16],
}

/// Negate the given columns of a row-major flattened 4x4 matrix
pub fn negate_columns(matrix: &[f64; 16], columns: &[usize]) -> [f64; 16] {
    let mut out = *matrix;
    for row in 0..4 {
        for &col in columns {
            out[row * 4 + col] = -out[row * 4 + col];
        }
    }
    out
}

#[derive(Deserialize)]
struct Resolution {
    resolution_x: u32,
    resolution_y: u32,
}

/// Parse one view request payload
///
/// Returns `Ok(None)` when the viewer signals "not viewing" (zero width or
/// height); in that case the remaining fields are not required. A viewport
/// above `max_pixels` is rejected before anything is allocated for it.
pub fn parse_view_request(payload: &[u8], max_pixels: u64) -> Result<Option<ViewRequest>, SessionError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;

    let resolution = Resolution::deserialize(&value)?;
    if resolution.resolution_x == 0 || resolution.resolution_y == 0 {
        return Ok(None);
    }

    let pixels = u64::from(resolution.resolution_x) * u64::from(resolution.resolution_y);
    if pixels > max_pixels {
        return Err(SessionError::ResolutionTooLarge {
            width: resolution.resolution_x,
            height: resolution.resolution_y,
            limit: max_pixels,
        });
    }

    Ok(Some(ViewRequest::deserialize(value)?))
}

/// Write one length-prefixed message
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), SessionError> {
    let length = u32::try_from(payload.len()).map_err(|_| SessionError::TooLarge(payload.len()))?;
    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Read one length-prefixed message of at most `limit` bytes
pub fn read_message<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>, SessionError> {
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    let got = read_full(reader, &mut prefix)?;
    if got == 0 {
        return Err(SessionError::Closed);
    }
    if got < LENGTH_PREFIX_BYTES {
        return Err(SessionError::ShortRead {
            expected: LENGTH_PREFIX_BYTES,
            actual: got,
        });
    }

    let length = u32::from_le_bytes(prefix) as usize;
    if length > limit {
        return Err(SessionError::Oversized { length, limit });
    }

    let mut payload = vec![0u8; length];
    let got = read_full(reader, &mut payload)?;
    if got < length {
        return Err(SessionError::ShortRead {
            expected: length,
            actual: got,
        });
    }

    Ok(payload)
}

/// Fill `buf` until full or EOF, returning how many bytes arrived
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, SessionError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
