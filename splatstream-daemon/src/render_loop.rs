//! Frame loop driven on its own OS thread
//!
//! Each iteration fetches a pose, renders at whatever camera the primary
//! viewer negotiates (or the default camera), publishes to both channels and
//! sleeps off the rest of the frame interval. Frames can also be written to
//! disk as numbered JPEGs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use splatstream_frame::{FrameReader, RgbImage};
use splatstream_gateway::{CameraView, Gateway, GatewayStats, Renderer};

use crate::pose::PoseSource;
use crate::renderer::TestPatternRenderer;

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    PoseStreamEnded,
    FrameLimit,
}

#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub frames: u64,
    pub pose_errors: u64,
    pub frames_saved: u64,
    pub stop_reason: StopReason,
    pub stats: GatewayStats,
}

impl fmt::Display for LoopSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({:?}), {} sent to viewer, {} trailer-only, {} session failures, {} encode failures, {} pose errors, {} saved",
            self.frames,
            self.stop_reason,
            self.stats.frames_sent,
            self.stats.trailers_only,
            self.stats.session_failures,
            self.stats.encode_failures,
            self.pose_errors,
            self.frames_saved
        )
    }
}

pub struct RenderLoop {
    gateway: Gateway,
    renderer: TestPatternRenderer,
    poses: Box<dyn PoseSource>,
    fallback: CameraView,
    trailer: String,
    interval: Duration,
    max_frames: Option<u64>,
    output_dir: Option<PathBuf>,
}

impl RenderLoop {
    pub fn new(
        gateway: Gateway,
        poses: Box<dyn PoseSource>,
        fallback: CameraView,
        trailer: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            renderer: TestPatternRenderer::new(),
            poses,
            fallback,
            trailer: trailer.into(),
            interval,
            max_frames: None,
            output_dir: None,
        }
    }

    /// Stop after `frames` iterations
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Also write every rendered frame to `dir` as `{frame:04}.jpg`
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Read side of the broadcast frame slot
    pub fn frames(&self) -> FrameReader {
        self.gateway.frames()
    }

    /// Run until `shutdown` is set, the pose stream ends or the frame limit is hit
    pub fn run(mut self, shutdown: &AtomicBool) -> LoopSummary {
        let mut frame_idx = 0u64;
        let mut pose_errors = 0u64;
        let mut frames_saved = 0u64;

        if let Some(dir) = &self.output_dir {
            match std::fs::create_dir_all(dir) {
                Ok(()) => info!("💾 Saving frames to {}", dir.display()),
                Err(e) => warn!("Failed to create output dir {}: {}", dir.display(), e),
            }
        }

        let stop_reason = loop {
            if shutdown.load(Ordering::Relaxed) {
                break StopReason::Shutdown;
            }
            if self.max_frames.is_some_and(|max| frame_idx >= max) {
                break StopReason::FrameLimit;
            }

            let started = Instant::now();

            match self.poses.next_pose(frame_idx) {
                Ok(Some(pose)) => self.renderer.set_pose(pose),
                Ok(None) => {
                    info!("🏁 Pose stream ended after {} frames", frame_idx);
                    break StopReason::PoseStreamEnded;
                }
                Err(e) => {
                    // Keep rendering the previous pose
                    pose_errors += 1;
                    warn!("Pose fetch failed for frame {}: {:#}", frame_idx, e);
                }
            }

            let renderer = &mut self.renderer;
            let output_dir = self.output_dir.as_deref();
            let mut render_and_save = |camera: &CameraView| {
                let image = renderer.render(camera);
                if let Some(dir) = output_dir {
                    if save_frame(dir, frame_idx, &image) {
                        frames_saved += 1;
                    }
                }
                image
            };
            let report = self
                .gateway
                .publish_rendered(&mut render_and_save, &self.fallback, &self.trailer);
            debug!(
                "Frame {} published: primary={:?} broadcast_seq={:?}",
                frame_idx, report.primary, report.broadcast_seq
            );

            frame_idx += 1;

            if let Some(rest) = self.interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        };

        LoopSummary {
            frames: frame_idx,
            pose_errors,
            frames_saved,
            stop_reason,
            stats: self.gateway.stats(),
        }
    }
}

/// Write one frame as `{dir}/{frame_idx:04}.jpg`; failures are logged, not fatal
fn save_frame(dir: &Path, frame_idx: u64, image: &RgbImage) -> bool {
    let path = dir.join(format!("{:04}.jpg", frame_idx));
    match image.save(&path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to save frame {} to {}: {}", frame_idx, path.display(), e);
            false
        }
    }
}
