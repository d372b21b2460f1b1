//! Built-in stand-in for the avatar renderer
//!
//! Draws a gradient backdrop and a disc at the projected root translation of
//! the current pose, so a viewer can see both camera changes and pose
//! updates without the real splatting renderer attached.

use image::Rgb;
use splatstream_frame::RgbImage;
use splatstream_gateway::{CameraView, Renderer};

use crate::pose::PoseParams;

const MARKER_SCALE: f64 = 0.15;

pub struct TestPatternRenderer {
    pose: PoseParams,
}

impl TestPatternRenderer {
    pub fn new() -> Self {
        Self {
            pose: PoseParams::default(),
        }
    }

    pub fn set_pose(&mut self, pose: PoseParams) {
        self.pose = pose;
    }

    /// Pixel position and radius of the marker for `camera`
    pub fn marker(&self, camera: &CameraView) -> (f64, f64, f64) {
        let width = camera.width.max(1) as f64;
        let height = camera.height.max(1) as f64;

        let x = self.pose.transl.first().copied().unwrap_or(0.0);
        let y = self.pose.transl.get(1).copied().unwrap_or(0.0);
        let z = self
            .pose
            .transl
            .get(2)
            .copied()
            .unwrap_or(1.0)
            .max(camera.z_near.max(1e-3));

        let fx = focal(width, camera.fov_x);
        let fy = focal(height, camera.fov_y);

        let u = width / 2.0 + fx * x / z;
        let v = height / 2.0 - fy * y / z;
        let radius = (fx.min(fy) * MARKER_SCALE / z * camera.scaling_modifier.max(0.0))
            .clamp(2.0, (width.min(height) / 2.0).max(2.0));

        (u, v, radius)
    }

    fn marker_colour(&self) -> Rgb<u8> {
        let channel = |i: usize| {
            let angle = self.pose.global_orient.get(i).copied().unwrap_or(0.0);
            (128.0 + 127.0 * angle.sin()) as u8
        };
        Rgb([channel(0), channel(1), channel(2)])
    }
}

impl Default for TestPatternRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pinhole focal length in pixels for a field of view in degrees
fn focal(extent: f64, fov_degrees: f64) -> f64 {
    let half = (fov_degrees.clamp(1.0, 179.0) / 2.0).to_radians();
    extent / 2.0 / half.tan()
}

impl Renderer for TestPatternRenderer {
    fn render(&mut self, camera: &CameraView) -> RgbImage {
        let width = camera.width.max(1);
        let height = camera.height.max(1);
        let (u, v, radius) = self.marker(camera);
        let colour = self.marker_colour();
        let radius_sq = radius * radius;

        RgbImage::from_fn(width, height, |px, py| {
            let dx = px as f64 + 0.5 - u;
            let dy = py as f64 + 0.5 - v;
            if dx * dx + dy * dy <= radius_sq {
                return colour;
            }

            let shade = (255 * py / height.max(1)) as u8;
            Rgb([shade / 4, shade / 3, 96 + shade / 3])
        })
    }
}
