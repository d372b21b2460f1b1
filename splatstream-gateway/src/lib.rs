//! Render streaming gateway
//!
//! Serves rendered frames to one authoritative viewer over a length-prefixed
//! TCP protocol and hands every frame to the broadcast channel through the
//! shared frame slot.
//!
//! # Example Usage
//!
//! ```no_run
//! use splatstream_frame::{FrameEncoder, ImageFormat, RgbImage};
//! use splatstream_gateway::{Gateway, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::bind("127.0.0.1:6009", SessionConfig::default())?;
//!     let mut gateway = Gateway::new(Some(session), FrameEncoder::new(ImageFormat::Jpeg));
//!
//!     // Hand gateway.frames() to the broadcaster, then once per rendered frame:
//!     let image = RgbImage::new(1080, 1080);
//!     let report = gateway.publish(&image, "verify");
//!     println!("{:?}", report.primary);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod gateway;
pub mod protocol;
pub mod render;
pub mod session;

// Re-exports
pub use error::{GatewayError, Result, SessionError};
pub use gateway::{Gateway, GatewayStats, PrimaryOutcome, PublishReport};
pub use protocol::{CameraView, ViewRequest};
pub use render::{PlanarRenderer, Renderer};
pub use session::{Session, SessionConfig, ViewOutcome};
