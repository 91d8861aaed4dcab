//! The renderer frontend.
//!
//! [`Renderer`] owns a boxed [`RendererBackend`] and turns one
//! [`RenderPacket`] per tick into a frame: camera matrices, one spinning quad,
//! submit and present.

use glam::{Mat4, Vec3, Vec4};
use tracing::{debug, info, warn};

use crate::backend::RendererBackend;
use crate::context::FrameStatus;
use crate::error::{RendererError, RendererResult};
use crate::gpu::Extent;

const FOV_Y_DEGREES: f32 = 45.0;
const NEAR_CLIP: f32 = 0.1;
const FAR_CLIP: f32 = 1000.0;

/// Distance the world is pushed along -Z in view space.
const VIEW_DISTANCE: f32 = 30.0;

/// Quad spin in radians per second.
const ROTATION_SPEED: f32 = 1.0;

const AMBIENT_COLOUR: Vec4 = Vec4::new(0.25, 0.25, 0.25, 1.0);

/// Per-tick input to [`Renderer::draw_frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPacket {
    /// Seconds since the previous tick.
    pub delta_time: f32,
}

pub struct Renderer {
    backend: Option<Box<dyn RendererBackend>>,
    width: u32,
    height: u32,
    projection: Mat4,
    view: Mat4,
    angle: f32,
}

impl Renderer {
    /// Initializes `backend` for a `width`x`height` target.
    ///
    /// # Errors
    ///
    /// Returns the backend's initialization error.
    pub fn new(
        mut backend: Box<dyn RendererBackend>,
        app_name: &str,
        width: u32,
        height: u32,
    ) -> RendererResult<Self> {
        backend.initialize(app_name, width, height)?;
        info!("Renderer initialized: {}x{}", width, height);

        Ok(Self {
            backend: Some(backend),
            width,
            height,
            projection: projection(width, height),
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -VIEW_DISTANCE)),
            angle: 0.0,
        })
    }

    /// Forwards a new target size to the backend and updates the projection.
    pub fn resize(&mut self, width: u32, height: u32) {
        match self.backend.as_mut() {
            Some(backend) => {
                self.width = width;
                self.height = height;
                self.projection = projection(width, height);
                backend.resize(width, height);
            }
            None => warn!(
                "Renderer backend does not exist to accept resize: {}x{}",
                width, height
            ),
        }
    }

    /// Draws one frame. A skipped frame is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is gone or reports a hard failure.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> RendererResult<()> {
        let backend = self.backend.as_mut().ok_or(RendererError::NotInitialized)?;

        if backend.begin_frame(packet.delta_time)? == FrameStatus::Skip {
            debug!("Frame skipped");
            return Ok(());
        }

        backend.update_global_state(
            self.projection,
            self.view,
            Vec3::new(0.0, 0.0, VIEW_DISTANCE),
            AMBIENT_COLOUR,
            0,
        )?;

        self.angle = (self.angle + packet.delta_time * ROTATION_SPEED) % std::f32::consts::TAU;
        backend.update_object(Mat4::from_rotation_z(self.angle))?;

        backend.end_frame(packet.delta_time)
    }

    /// Shuts the backend down and drops it. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the backend's shutdown error.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown()?;
            info!("Renderer shut down");
        }
        Ok(())
    }

    pub fn backend(&self) -> Option<&dyn RendererBackend> {
        self.backend.as_deref()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// Current quad rotation about Z, in radians.
    pub fn angle(&self) -> f32 {
        self.angle
    }
}

fn projection(width: u32, height: u32) -> Mat4 {
    let aspect = Extent::new(width, height).aspect_ratio();
    Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, NEAR_CLIP, FAR_CLIP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BackendState;
    use crate::null::NullBackend;

    #[test]
    fn test_projection_uses_aspect() {
        let wide = projection(1280, 720);
        let square = projection(240, 240);
        assert!(wide.x_axis.x < square.x_axis.x);
        assert_eq!(projection(240, 0), projection(1, 1));
    }

    #[test]
    fn test_draw_frame_accumulates_angle() {
        let mut renderer = Renderer::new(Box::new(NullBackend::new(3)), "test", 240, 240).unwrap();
        renderer.draw_frame(&RenderPacket { delta_time: 0.5 }).unwrap();
        renderer.draw_frame(&RenderPacket { delta_time: 0.25 }).unwrap();
        assert!((renderer.angle() - 0.75 * ROTATION_SPEED).abs() < 1e-6);
        assert_eq!(renderer.backend().unwrap().state(), BackendState::Ready);
    }

    #[test]
    fn test_skipped_frame_does_not_rotate() {
        let mut renderer = Renderer::new(Box::new(NullBackend::new(3)), "test", 240, 240).unwrap();
        renderer.resize(480, 240);
        renderer.draw_frame(&RenderPacket { delta_time: 0.5 }).unwrap();
        assert_eq!(renderer.angle(), 0.0);
        assert_eq!(renderer.size(), (480, 240));
    }

    #[test]
    fn test_shutdown_then_resize_and_draw() {
        let mut renderer = Renderer::new(Box::new(NullBackend::new(3)), "test", 240, 240).unwrap();
        renderer.shutdown().unwrap();
        renderer.shutdown().unwrap();

        renderer.resize(100, 100);
        assert_eq!(renderer.size(), (240, 240));
        assert!(matches!(
            renderer.draw_frame(&RenderPacket::default()),
            Err(RendererError::NotInitialized)
        ));
    }
}
