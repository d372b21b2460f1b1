use splatstream_frame::{rgb_from_planar_f32, RgbImage};

use crate::protocol::CameraView;

/// Produces a raster for a camera; the avatar renderer lives behind this
pub trait Renderer {
    fn render(&mut self, camera: &CameraView) -> RgbImage;
}

impl<F> Renderer for F
where
    F: FnMut(&CameraView) -> RgbImage,
{
    fn render(&mut self, camera: &CameraView) -> RgbImage {
        self(camera)
    }
}

/// Adapts a renderer whose output is a planar `(3, H, W)` float tensor in `[0, 1]`
///
/// A tensor that does not match the camera size yields a black frame.
pub struct PlanarRenderer<F> {
    render: F,
}

impl<F> PlanarRenderer<F>
where
    F: FnMut(&CameraView) -> Vec<f32>,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }
}

impl<F> Renderer for PlanarRenderer<F>
where
    F: FnMut(&CameraView) -> Vec<f32>,
{
    fn render(&mut self, camera: &CameraView) -> RgbImage {
        let planes = (self.render)(camera);
        match rgb_from_planar_f32(&planes, camera.width, camera.height) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(
                    "Planar render for {}x{} unusable: {}",
                    camera.width,
                    camera.height,
                    e
                );
                RgbImage::new(camera.width, camera.height)
            }
        }
    }
}
