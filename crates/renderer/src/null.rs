//! A GPU-free backend.
//!
//! [`NullGpu`] keeps the bookkeeping of a real swap chain (a fixed ring of
//! images handed out round-robin, fences that signal on submit) without
//! touching a driver. [`NullBackend`] wraps it in a [`Context`] for headless
//! runs and tests.

use glam::{Mat4, Vec3, Vec4};
use tracing::{debug, info};

use crate::backend::RendererBackend;
use crate::context::{BackendState, Context, FrameStatus};
use crate::error::{RendererError, RendererResult};
use crate::gpu::{AcquireOutcome, Extent, FrameFence, FrameGpu, PresentOutcome, TargetInfo};
use crate::ubo::GlobalUniform;

/// Fence that is signaled as soon as work is submitted against it.
#[derive(Debug)]
pub struct NullFence {
    signaled: bool,
}

impl FrameFence for NullFence {
    fn wait(&mut self, _timeout_ns: u64) -> RendererResult<bool> {
        Ok(self.signaled)
    }

    fn reset(&mut self) -> RendererResult<()> {
        self.signaled = false;
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        self.signaled
    }
}

#[derive(Debug)]
pub struct NullSemaphore;

/// Counters of what a [`NullGpu`] was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullStats {
    pub builds: u32,
    pub submits: u64,
    pub presents: u64,
    pub objects_drawn: u64,
}

/// Driverless [`FrameGpu`] with a fixed image count.
#[derive(Debug)]
pub struct NullGpu {
    image_count: u32,
    next_image: u32,
    extent: Extent,
    recording: Option<u32>,
    released: bool,
    stats: NullStats,
}

impl NullGpu {
    /// Creates a GPU whose chain always reports `image_count` images (at least one).
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count: image_count.max(1),
            next_image: 0,
            extent: Extent::default(),
            recording: None,
            released: false,
            stats: NullStats::default(),
        }
    }

    pub fn stats(&self) -> NullStats {
        self.stats
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameGpu for NullGpu {
    type Fence = NullFence;
    type Semaphore = NullSemaphore;

    fn create_fence(&mut self, signaled: bool) -> RendererResult<NullFence> {
        Ok(NullFence { signaled })
    }

    fn create_semaphore(&mut self) -> RendererResult<NullSemaphore> {
        Ok(NullSemaphore)
    }

    fn build_targets(&mut self, width: u32, height: u32) -> RendererResult<TargetInfo> {
        self.extent = Extent::new(width, height);
        self.next_image = 0;
        self.released = false;
        self.stats.builds += 1;

        debug!(
            "Null targets built: {}x{}, {} image(s)",
            width, height, self.image_count
        );

        Ok(TargetInfo {
            image_count: self.image_count,
            max_frames_in_flight: self.image_count.saturating_sub(1).max(1),
            extent: self.extent,
        })
    }

    fn acquire_next_image(
        &mut self,
        _signal: &NullSemaphore,
        _timeout_ns: u64,
    ) -> RendererResult<AcquireOutcome> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(AcquireOutcome::Acquired(image))
    }

    fn present(&mut self, _image: u32, _wait: &NullSemaphore) -> RendererResult<PresentOutcome> {
        self.stats.presents += 1;
        Ok(PresentOutcome::Presented)
    }

    fn begin_recording(&mut self, image: u32, _extent: Extent) -> RendererResult<()> {
        self.recording = Some(image);
        Ok(())
    }

    fn end_recording(&mut self, _image: u32) -> RendererResult<()> {
        self.recording = None;
        Ok(())
    }

    fn update_global_state(&mut self, _image: u32, _uniform: &GlobalUniform) -> RendererResult<()> {
        Ok(())
    }

    fn update_object(&mut self, _image: u32, _model: Mat4) -> RendererResult<()> {
        self.stats.objects_drawn += 1;
        Ok(())
    }

    fn submit(
        &mut self,
        _image: u32,
        _wait: &NullSemaphore,
        _signal: &NullSemaphore,
        fence: &mut NullFence,
    ) -> RendererResult<()> {
        fence.signaled = true;
        self.stats.submits += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        Ok(())
    }

    fn release(&mut self) {
        self.recording = None;
        self.released = true;
    }
}

// ============================================================================
// Backend
// ============================================================================

/// [`RendererBackend`] over a [`NullGpu`].
pub struct NullBackend {
    image_count: u32,
    context: Option<Context<NullGpu>>,
}

impl NullBackend {
    /// Creates a backend whose swap chain reports `image_count` images.
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count,
            context: None,
        }
    }

    pub fn context(&self) -> Option<&Context<NullGpu>> {
        self.context.as_ref()
    }

    fn context_mut(&mut self) -> RendererResult<&mut Context<NullGpu>> {
        self.context.as_mut().ok_or(RendererError::NotInitialized)
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RendererBackend for NullBackend {
    fn initialize(&mut self, app_name: &str, width: u32, height: u32) -> RendererResult<()> {
        if let Some(context) = &self.context {
            return Err(RendererError::InvalidState {
                operation: "initialize",
                state: context.state(),
            });
        }

        let mut context = Context::new(NullGpu::new(self.image_count), u64::MAX);
        context.initialize(width, height)?;
        self.context = Some(context);

        info!("Null backend initialized for '{}'", app_name);
        Ok(())
    }

    fn shutdown(&mut self) -> RendererResult<()> {
        match self.context.as_mut() {
            Some(context) => context.shutdown(),
            None => Ok(()),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(context) = self.context.as_mut() {
            context.resize(width, height);
        }
    }

    fn begin_frame(&mut self, delta_time: f32) -> RendererResult<FrameStatus> {
        self.context_mut()?.begin_frame(delta_time)
    }

    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_colour: Vec4,
        mode: i32,
    ) -> RendererResult<()> {
        let uniform = GlobalUniform::new(projection, view, view_position, ambient_colour, mode);
        self.context_mut()?.update_global_state(&uniform)
    }

    fn update_object(&mut self, model: Mat4) -> RendererResult<()> {
        self.context_mut()?.update_object(model)
    }

    fn end_frame(&mut self, delta_time: f32) -> RendererResult<()> {
        self.context_mut()?.end_frame(delta_time)
    }

    fn state(&self) -> BackendState {
        self.context
            .as_ref()
            .map_or(BackendState::Uninitialized, Context::state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_fence_signals_on_submit() {
        let mut gpu = NullGpu::new(3);
        let mut fence = gpu.create_fence(false).unwrap();
        assert!(!fence.wait(0).unwrap());

        gpu.submit(0, &NullSemaphore, &NullSemaphore, &mut fence)
            .unwrap();
        assert!(fence.is_signaled());
        assert_eq!(gpu.stats().submits, 1);
    }

    #[test]
    fn test_images_round_robin() {
        let mut gpu = NullGpu::new(2);
        gpu.build_targets(64, 64).unwrap();
        let acquired: Vec<_> = (0..3)
            .map(|_| gpu.acquire_next_image(&NullSemaphore, 0).unwrap())
            .collect();
        assert_eq!(
            acquired,
            [
                AcquireOutcome::Acquired(0),
                AcquireOutcome::Acquired(1),
                AcquireOutcome::Acquired(0)
            ]
        );
    }

    #[test]
    fn test_single_image_keeps_one_frame_in_flight() {
        let mut gpu = NullGpu::new(1);
        let info = gpu.build_targets(64, 64).unwrap();
        assert_eq!(info.image_count, 1);
        assert_eq!(info.max_frames_in_flight, 1);
    }

    #[test]
    fn test_backend_requires_initialize() {
        let mut backend = NullBackend::default();
        assert_eq!(backend.state(), BackendState::Uninitialized);
        assert!(matches!(
            backend.begin_frame(0.0),
            Err(RendererError::NotInitialized)
        ));
        // Shutting down an uninitialized backend is harmless
        backend.shutdown().unwrap();
    }
}
