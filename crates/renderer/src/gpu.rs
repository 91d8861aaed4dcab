//! The seam between the frame orchestrator and a concrete GPU.
//!
//! # Overview
//!
//! [`Context`](crate::Context) owns everything sized by the number of frames
//! in flight (fences and semaphore pairs) and drives the frame protocol. A
//! [`FrameGpu`] owns everything sized by the swap-chain image count: the
//! swap chain itself, its depth attachment, framebuffers, per-image command
//! buffers and per-image uniform state. It creates sync objects on request but
//! never holds on to them.
//!
//! Splitting along that line keeps the synchronization discipline in one
//! backend-agnostic place, testable with a scripted GPU.

use glam::Mat4;

use crate::error::RendererResult;
use crate::ubo::GlobalUniform;

/// Pixel size of the render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height, or 1.0 for a degenerate extent.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// What a (re)build of the render targets produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub image_count: u32,
    pub max_frames_in_flight: u32,
    /// Negotiated extent, which may differ from the requested one.
    pub extent: Extent,
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// The surface no longer matches the targets; rebuild before drawing.
    Stale,
    /// No image became available within the timeout.
    TimedOut,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; rebuild before the next frame.
    Stale,
}

/// A host-waitable fence with a shadow of its last observed state.
pub trait FrameFence {
    /// Waits up to `timeout_ns`; `Ok(false)` means the timeout elapsed.
    /// A fence already known to be signaled returns without waiting.
    fn wait(&mut self, timeout_ns: u64) -> RendererResult<bool>;

    /// Returns the fence to the unsignaled state.
    fn reset(&mut self) -> RendererResult<()>;

    fn is_signaled(&self) -> bool;
}

/// GPU operations the frame orchestrator is written against.
///
/// Image indices passed back in are always ones returned by
/// [`FrameGpu::acquire_next_image`] since the last [`FrameGpu::build_targets`].
pub trait FrameGpu {
    type Fence: FrameFence;
    type Semaphore;

    fn create_fence(&mut self, signaled: bool) -> RendererResult<Self::Fence>;

    fn create_semaphore(&mut self) -> RendererResult<Self::Semaphore>;

    /// Creates the render targets, or rebuilds them in place for a new size.
    ///
    /// The caller guarantees the GPU is idle before a rebuild.
    fn build_targets(&mut self, width: u32, height: u32) -> RendererResult<TargetInfo>;

    fn acquire_next_image(
        &mut self,
        signal: &Self::Semaphore,
        timeout_ns: u64,
    ) -> RendererResult<AcquireOutcome>;

    fn present(&mut self, image: u32, wait: &Self::Semaphore) -> RendererResult<PresentOutcome>;

    /// Resets and begins the image's command buffer, sets the dynamic state
    /// and begins the render pass.
    fn begin_recording(&mut self, image: u32, extent: Extent) -> RendererResult<()>;

    /// Ends the render pass and the command buffer.
    fn end_recording(&mut self, image: u32) -> RendererResult<()>;

    fn update_global_state(&mut self, image: u32, uniform: &GlobalUniform) -> RendererResult<()>;

    fn update_object(&mut self, image: u32, model: Mat4) -> RendererResult<()>;

    /// Submits the image's command buffer. `fence` has been reset by the caller.
    fn submit(
        &mut self,
        image: u32,
        wait: &Self::Semaphore,
        signal: &Self::Semaphore,
        fence: &mut Self::Fence,
    ) -> RendererResult<()>;

    fn wait_idle(&mut self) -> RendererResult<()>;

    /// Destroys the render targets: command buffers, framebuffers, render
    /// pass, then the swap chain. Sync objects are already gone.
    fn release(&mut self);
}
