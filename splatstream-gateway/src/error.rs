use splatstream_frame::FrameError;
use thiserror::Error;

/// Per-connection failures. All of them collapse the session back to empty.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by viewer")]
    Closed,

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Message length {length} exceeds limit of {limit} bytes")]
    Oversized { length: usize, limit: usize },

    #[error("Requested viewport {width}x{height} exceeds limit of {limit} pixels")]
    ResolutionTooLarge { width: u32, height: u32, limit: u64 },

    #[error("Malformed view request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload of {0} bytes does not fit a u32 length prefix")]
    TooLarge(usize),

    #[error("No viewer connected")]
    NotConnected,
}

/// Startup and encoding failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to bind primary listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
