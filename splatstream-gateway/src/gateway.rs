//! Per-frame orchestration across the primary and broadcast channels
//!
//! The render loop calls [`Gateway::publish`] once per frame. Viewer
//! connectivity problems never escape this type: they are logged, counted and
//! reported in the returned [`PublishReport`], and the next call starts from
//! a clean session.

use splatstream_frame::{
    adapt, frame_buffer, FrameEncoder, FrameReader, FrameWriter, RgbImage,
};
use tracing::{debug, warn};

use crate::protocol::{CameraView, ViewRequest};
use crate::render::Renderer;
use crate::session::{Session, ViewOutcome};

/// What happened on the primary channel during one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryOutcome {
    /// Primary channel not configured
    Disabled,

    /// No viewer attached
    NoViewer,

    /// Viewer asked for a zero-sized viewport, only the trailer was sent
    Inactive,

    /// Frame and trailer delivered
    Sent { width: u32, height: u32, bytes: usize },

    /// Exchange failed, session dropped
    Failed(String),
}

/// Result of one [`Gateway::publish`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub primary: PrimaryOutcome,

    /// Sequence number stored for the broadcast channel, `None` if compression failed
    pub broadcast_seq: Option<u64>,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub published: u64,
    pub frames_sent: u64,
    pub trailers_only: u64,
    pub session_failures: u64,
    pub encode_failures: u64,
}

pub struct Gateway {
    session: Option<Session>,
    writer: FrameWriter,
    encoder: FrameEncoder,
    stats: GatewayStats,
}

impl Gateway {
    /// Create a gateway; `session = None` runs broadcast-only
    pub fn new(session: Option<Session>, encoder: FrameEncoder) -> Self {
        let (writer, _) = frame_buffer();
        Self {
            session,
            writer,
            encoder,
            stats: GatewayStats::default(),
        }
    }

    /// Read side of the broadcast frame slot
    pub fn frames(&self) -> FrameReader {
        self.writer.reader()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    /// Publish an already rendered frame to both channels
    pub fn publish(&mut self, image: &RgbImage, trailer: &str) -> PublishReport {
        let primary = match self.negotiate(trailer) {
            Ok(view) => self.send_adapted(image, &view, trailer),
            Err(outcome) => outcome,
        };

        self.finish(image, primary)
    }

    /// Negotiate first, then render at the viewer's camera
    ///
    /// Without an active viewer the frame is rendered at `fallback` so the
    /// broadcast channel keeps moving.
    pub fn publish_rendered<R>(&mut self, renderer: &mut R, fallback: &CameraView, trailer: &str) -> PublishReport
    where
        R: Renderer + ?Sized,
    {
        let negotiated = self.negotiate(trailer);

        let image = match &negotiated {
            Ok(view) => renderer.render(&view.camera()),
            Err(_) => renderer.render(fallback),
        };

        let primary = match negotiated {
            Ok(view) => self.send_adapted(&image, &view, trailer),
            Err(outcome) => outcome,
        };

        self.finish(&image, primary)
    }

    /// Accept if needed and read the next view; `Err` carries a finished outcome
    fn negotiate(&mut self, trailer: &str) -> Result<ViewRequest, PrimaryOutcome> {
        let Some(session) = self.session.as_mut() else {
            return Err(PrimaryOutcome::Disabled);
        };

        session.accept_if_absent();

        match session.request_view() {
            ViewOutcome::NoViewer => Err(PrimaryOutcome::NoViewer),
            ViewOutcome::Active(view) => Ok(view),
            ViewOutcome::Inactive => match session.send_frame(&[], trailer) {
                Ok(()) => {
                    self.stats.trailers_only += 1;
                    Err(PrimaryOutcome::Inactive)
                }
                Err(e) => {
                    self.stats.session_failures += 1;
                    Err(PrimaryOutcome::Failed(e.to_string()))
                }
            },
            ViewOutcome::Failed(e) => {
                self.stats.session_failures += 1;
                Err(PrimaryOutcome::Failed(e.to_string()))
            }
        }
    }

    fn send_adapted(&mut self, image: &RgbImage, view: &ViewRequest, trailer: &str) -> PrimaryOutcome {
        let Some(session) = self.session.as_mut() else {
            return PrimaryOutcome::Disabled;
        };

        let frame = match adapt(image, view.width, view.height) {
            Ok(adapted) => FrameEncoder::encode_raw(adapted),
            Err(e) => {
                warn!("Cannot adapt frame to viewer: {}", e);
                FrameEncoder::encode_raw(RgbImage::new(0, 0))
            }
        };

        match session.send_frame(frame.bytes(), trailer) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                PrimaryOutcome::Sent {
                    width: view.width,
                    height: view.height,
                    bytes: frame.len(),
                }
            }
            Err(e) => {
                self.stats.session_failures += 1;
                PrimaryOutcome::Failed(e.to_string())
            }
        }
    }

    fn finish(&mut self, image: &RgbImage, primary: PrimaryOutcome) -> PublishReport {
        self.stats.published += 1;

        let broadcast_seq = match self.encoder.compress(image) {
            Ok(frame) => Some(self.writer.store(frame)),
            Err(e) => {
                self.stats.encode_failures += 1;
                warn!("Failed to compress broadcast frame: {}", e);
                None
            }
        };

        debug!("Published frame: primary={:?}, broadcast_seq={:?}", primary, broadcast_seq);

        PublishReport {
            primary,
            broadcast_seq,
        }
    }
}
