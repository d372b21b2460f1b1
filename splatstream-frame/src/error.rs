use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Raster size mismatch: expected {expected} values, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, FrameError>;
