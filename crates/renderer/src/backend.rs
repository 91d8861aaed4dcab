//! The backend interface the frontend renders through.

use glam::{Mat4, Vec3, Vec4};

use crate::context::{BackendState, FrameStatus};
use crate::error::RendererResult;

/// A rendering backend: the Vulkan one, or [`NullBackend`](crate::NullBackend)
/// for headless use.
///
/// Calls follow the frame protocol: `initialize` once, then any number of
/// `begin_frame` → draw calls → `end_frame` cycles, where the draw calls and
/// `end_frame` are only made after `begin_frame` returned
/// [`FrameStatus::Proceed`], then `shutdown`.
pub trait RendererBackend {
    /// Creates every GPU object for a `width`x`height` target.
    fn initialize(&mut self, app_name: &str, width: u32, height: u32) -> RendererResult<()>;

    /// Waits for the GPU and destroys everything `initialize` created.
    fn shutdown(&mut self) -> RendererResult<()>;

    /// Records a new target size, applied lazily at the next `begin_frame`.
    fn resize(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self, delta_time: f32) -> RendererResult<FrameStatus>;

    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_colour: Vec4,
        mode: i32,
    ) -> RendererResult<()>;

    fn update_object(&mut self, model: Mat4) -> RendererResult<()>;

    fn end_frame(&mut self, delta_time: f32) -> RendererResult<()>;

    fn state(&self) -> BackendState;
}
