//! Browser broadcast channel for rendered frames
//!
//! This crate provides a WebSocket server that pushes the most recent rendered
//! frame to any number of browser subscribers on a fixed cadence. Frames are
//! read from a [`splatstream_frame::FrameSource`], so the broadcaster never
//! touches the render loop directly.
//!
//! # Features
//!
//! - WebSocket server (default `0.0.0.0:8765`)
//! - JSON text messages with base64-encoded images
//! - Fixed push cadence (default 30 ms), each frame sent at most once per subscriber
//! - Bounded per-subscriber queues: a slow subscriber skips frames instead of
//!   stalling the others
//! - Closed subscribers are dropped on the next push
//!
//! # Event Types
//!
//! - `hello` - Sent on connect, carries the push interval
//! - `new_frame` - Latest frame (`seq`, `format`, `width`, `height`, `image`)
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use splatstream_broadcaster::{BroadcasterConfig, FrameBroadcaster};
//! use splatstream_frame::frame_buffer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (_writer, reader) = frame_buffer();
//!
//!     // Create and start broadcaster
//!     let broadcaster = FrameBroadcaster::new(BroadcasterConfig::default(), Arc::new(reader));
//!     let addr = broadcaster.start().await?;
//!     println!("listening on ws://{}", addr);
//!
//!     // The render loop stores frames through `_writer`; they are pushed automatically
//!
//!     // Stop broadcaster
//!     broadcaster.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod error;
pub mod events;

// Re-exports
pub use broadcaster::{BroadcasterConfig, FrameBroadcaster, DEFAULT_BROADCAST_ADDR, DEFAULT_FRAME_INTERVAL};
pub use client::{Delivery, Subscriber, SubscriberRegistry};
pub use error::{BroadcasterError, Result};
pub use events::BroadcastEvent;
