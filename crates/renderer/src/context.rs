//! The frame orchestrator.
//!
//! # Overview
//!
//! [`Context`] ties a [`FrameGpu`] to the per-frame synchronization objects
//! and runs the begin-frame/end-frame protocol:
//!
//! 1. `begin_frame` waits on the frame slot's fence, acquires an image, waits
//!    on whichever fence last rendered to that image, then starts recording.
//! 2. The caller records draws through `update_global_state`/`update_object`.
//! 3. `end_frame` finishes recording, resets the slot's fence, submits gated
//!    on the slot's semaphore pair and presents.
//!
//! # Frame slots versus images
//!
//! Fences and semaphore pairs are sized by `max_frames_in_flight`; the
//! `images_in_flight` table is sized by the swap-chain image count. The two
//! cycles drift apart whenever there are more images than slots, which is why
//! each image remembers the slot that last used it.
//!
//! # Resize
//!
//! [`Context::resize`] only records a [`PendingResize`]. The next
//! `begin_frame` compares generations, rebuilds once for the latest size and
//! skips that frame. Any number of resizes between two frames coalesce into
//! one rebuild.
//!
//! # Example
//!
//! ```no_run
//! use framepace_renderer::{Context, FrameStatus, NullGpu};
//!
//! # fn example() -> framepace_renderer::RendererResult<()> {
//! let mut context = Context::new(NullGpu::new(3), u64::MAX);
//! context.initialize(240, 240)?;
//!
//! if context.begin_frame(0.016)? == FrameStatus::Proceed {
//!     // ... record draws ...
//!     context.end_frame(0.016)?;
//! }
//!
//! context.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use glam::Mat4;
use tracing::{debug, error, info, trace};

use crate::error::{RendererError, RendererResult};
use crate::gpu::{AcquireOutcome, Extent, FrameFence, FrameGpu, PresentOutcome, TargetInfo};
use crate::ubo::GlobalUniform;

// ============================================================================
// State
// ============================================================================

/// Lifecycle of the whole rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    /// Targets and sync objects exist; no frame has completed yet.
    Initialized,
    /// Between frames.
    Ready,
    /// Between a proceeding `begin_frame` and its `end_frame`.
    Drawing,
    ShuttingDown,
    Destroyed,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Ready => "ready",
            Self::Drawing => "drawing",
            Self::ShuttingDown => "shutting down",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Context::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Recording has begun; draw, then call `end_frame`.
    Proceed,
    /// Nothing was started this tick; do not call `end_frame`.
    Skip,
}

/// A framebuffer size waiting to be applied at the top of the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResize {
    pub width: u32,
    pub height: u32,
    /// Bumped on every accepted resize.
    pub generation: u64,
}

// ============================================================================
// Context
// ============================================================================

/// Exclusively owned rendering context over a GPU `G`.
pub struct Context<G: FrameGpu> {
    gpu: G,

    fences: Vec<G::Fence>,
    image_acquired: Vec<G::Semaphore>,
    render_complete: Vec<G::Semaphore>,
    /// Per image: the frame slot whose fence guards its last submission.
    images_in_flight: Vec<Option<usize>>,

    image_count: u32,
    max_frames_in_flight: usize,
    current_frame: usize,
    image_index: u32,
    extent: Extent,

    /// Latest size the application asked for.
    framebuffer_size: Extent,
    pending_resize: PendingResize,
    applied_generation: u64,
    /// Set for the duration of a rebuild.
    recreating_swapchain: bool,
    /// Bumped each time the targets are rebuilt; the chain itself is kept.
    swapchain_generation: u64,

    state: BackendState,
    fence_timeout_ns: u64,
    frame_number: u64,
}

impl<G: FrameGpu> Context<G> {
    /// Wraps `gpu`. Nothing is created until [`Context::initialize`].
    ///
    /// # Arguments
    ///
    /// * `gpu` - The GPU the context drives
    /// * `fence_timeout_ns` - Bound on the frame fence and acquire waits (`u64::MAX` waits forever)
    pub fn new(gpu: G, fence_timeout_ns: u64) -> Self {
        Self {
            gpu,
            fences: Vec::new(),
            image_acquired: Vec::new(),
            render_complete: Vec::new(),
            images_in_flight: Vec::new(),
            image_count: 0,
            max_frames_in_flight: 0,
            current_frame: 0,
            image_index: 0,
            extent: Extent::default(),
            framebuffer_size: Extent::default(),
            pending_resize: PendingResize {
                width: 0,
                height: 0,
                generation: 0,
            },
            applied_generation: 0,
            recreating_swapchain: false,
            swapchain_generation: 0,
            state: BackendState::Uninitialized,
            fence_timeout_ns,
            frame_number: 0,
        }
    }

    /// Builds the render targets for `width`x`height` and the sync objects
    /// for every frame slot.
    ///
    /// Fences start signaled so the first wait on each slot returns at once.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidState`] unless the context is
    /// uninitialized, or any GPU error from building the targets.
    pub fn initialize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.expect_state("initialize", &[BackendState::Uninitialized])?;

        let info = self.gpu.build_targets(width, height)?;
        self.apply_targets(info)?;

        self.framebuffer_size = Extent::new(width, height);
        self.pending_resize = PendingResize {
            width,
            height,
            generation: 0,
        };
        self.applied_generation = 0;
        self.state = BackendState::Initialized;

        info!(
            "Render context initialized: {}x{}, {} image(s), {} frame(s) in flight",
            self.extent.width, self.extent.height, self.image_count, self.max_frames_in_flight
        );
        Ok(())
    }

    /// Records a new framebuffer size to apply at the next `begin_frame`.
    ///
    /// Zero-sized requests (a minimised window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return;
        }

        self.framebuffer_size = Extent::new(width, height);
        self.pending_resize = PendingResize {
            width,
            height,
            generation: self.pending_resize.generation + 1,
        };

        debug!(
            "Resize to {}x{} pending (generation {})",
            width, height, self.pending_resize.generation
        );
    }

    /// Starts a frame.
    ///
    /// Returns [`FrameStatus::Skip`] when the frame should not be drawn: a
    /// pending resize was just applied, a rebuild is in progress, the surface
    /// went stale, or a wait timed out.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside `Initialized`/`Ready`, or on any
    /// GPU failure other than the stale and timeout cases above.
    pub fn begin_frame(&mut self, _delta_time: f32) -> RendererResult<FrameStatus> {
        self.expect_state(
            "begin_frame",
            &[BackendState::Initialized, BackendState::Ready],
        )?;

        // Only observable by a caller that reenters while a rebuild is in
        // progress; a synchronous rebuild clears it before returning.
        if self.recreating_swapchain {
            debug!("Render targets are being rebuilt, skipping frame");
            return Ok(FrameStatus::Skip);
        }

        if self.pending_resize.generation != self.applied_generation {
            let pending = self.pending_resize;
            self.recreate_targets(pending.width, pending.height)?;
            return Ok(FrameStatus::Skip);
        }

        let frame = self.current_frame;
        if !self.fences[frame].wait(self.fence_timeout_ns)? {
            return Ok(FrameStatus::Skip);
        }

        let image = match self
            .gpu
            .acquire_next_image(&self.image_acquired[frame], self.fence_timeout_ns)?
        {
            AcquireOutcome::Acquired(image) => image,
            AcquireOutcome::Stale => {
                debug!("Surface stale on acquire, rebuilding render targets");
                let size = self.framebuffer_size;
                self.recreate_targets(size.width, size.height)?;
                return Ok(FrameStatus::Skip);
            }
            AcquireOutcome::TimedOut => {
                debug!("No swapchain image available within timeout, skipping frame");
                return Ok(FrameStatus::Skip);
            }
        };

        // The acquire semaphore is already pending, so this wait is unbounded:
        // skipping here would leave it signaled with nothing waiting on it.
        let slot = image as usize;
        if let Some(previous) = self.images_in_flight[slot]
            && previous != frame
        {
            trace!("Image {} still guarded by frame slot {}", image, previous);
            self.fences[previous].wait(u64::MAX)?;
        }
        self.images_in_flight[slot] = Some(frame);
        self.image_index = image;

        self.gpu.begin_recording(image, self.extent)?;
        self.state = BackendState::Drawing;

        trace!(
            "Frame {} begun: slot {}, image {}",
            self.frame_number, frame, image
        );
        Ok(FrameStatus::Proceed)
    }

    /// Pushes the per-frame global uniforms for the image being drawn.
    ///
    /// # Errors
    ///
    /// Returns an error outside a proceeding frame or if the upload fails.
    pub fn update_global_state(&mut self, uniform: &GlobalUniform) -> RendererResult<()> {
        self.expect_state("update_global_state", &[BackendState::Drawing])?;
        self.gpu.update_global_state(self.image_index, uniform)
    }

    /// Draws the object with model matrix `model`.
    ///
    /// # Errors
    ///
    /// Returns an error outside a proceeding frame.
    pub fn update_object(&mut self, model: Mat4) -> RendererResult<()> {
        self.expect_state("update_object", &[BackendState::Drawing])?;
        self.gpu.update_object(self.image_index, model)
    }

    /// Finishes the frame: submits and presents.
    ///
    /// The slot's fence is reset immediately before submission. A stale
    /// present rebuilds the targets at the latest requested size, which also
    /// settles any resize received during the frame; the frame still counts
    /// as complete and the slot index advances either way.
    ///
    /// # Errors
    ///
    /// Returns an error unless a frame is being drawn, or on a hard GPU failure.
    pub fn end_frame(&mut self, _delta_time: f32) -> RendererResult<()> {
        self.expect_state("end_frame", &[BackendState::Drawing])?;

        let frame = self.current_frame;
        let image = self.image_index;

        self.gpu.end_recording(image)?;

        self.fences[frame].reset()?;
        self.gpu.submit(
            image,
            &self.image_acquired[frame],
            &self.render_complete[frame],
            &mut self.fences[frame],
        )?;
        self.state = BackendState::Ready;

        let outcome = self.gpu.present(image, &self.render_complete[frame])?;

        self.current_frame = (frame + 1) % self.max_frames_in_flight;
        self.frame_number += 1;

        if outcome == PresentOutcome::Stale {
            debug!("Surface stale on present, rebuilding render targets");
            let size = self.framebuffer_size;
            self.recreate_targets(size.width, size.height)?;
        }

        Ok(())
    }

    /// Waits for the GPU, then destroys the sync objects followed by the
    /// render targets. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait fails; nothing is destroyed then.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        if self.state == BackendState::Destroyed {
            debug!("Render context already destroyed");
            return Ok(());
        }

        info!("Shutting down render context");
        self.state = BackendState::ShuttingDown;

        self.gpu.wait_idle()?;

        self.fences.clear();
        self.image_acquired.clear();
        self.render_complete.clear();
        self.images_in_flight.clear();

        self.gpu.release();

        self.state = BackendState::Destroyed;
        info!("Render context destroyed after {} frame(s)", self.frame_number);
        Ok(())
    }

    // ========================================================================
    // Recreation
    // ========================================================================

    /// Rebuilds the render targets in place and fits the sync arrays to the
    /// new frame-slot count.
    ///
    /// Every caller passes the latest requested size, so a successful rebuild
    /// marks the pending resize as applied.
    fn recreate_targets(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            debug!("Not rebuilding render targets for {}x{}", width, height);
            return Ok(());
        }

        self.recreating_swapchain = true;
        let result = self.rebuild(width, height);
        self.recreating_swapchain = false;
        result?;

        self.applied_generation = self.pending_resize.generation;
        self.swapchain_generation += 1;
        info!(
            "Render targets rebuilt: {}x{}, {} image(s) (generation {})",
            self.extent.width, self.extent.height, self.image_count, self.swapchain_generation
        );
        Ok(())
    }

    fn rebuild(&mut self, width: u32, height: u32) -> RendererResult<()> {
        self.gpu.wait_idle()?;
        let info = self.gpu.build_targets(width, height)?;
        self.apply_targets(info)
    }

    /// Sizes the sync arrays for `info`: existing objects are kept, surplus
    /// ones dropped and missing ones created signaled.
    fn apply_targets(&mut self, info: TargetInfo) -> RendererResult<()> {
        let frames = info.max_frames_in_flight.max(1) as usize;

        self.fences.truncate(frames);
        self.image_acquired.truncate(frames);
        self.render_complete.truncate(frames);

        while self.fences.len() < frames {
            self.fences.push(self.gpu.create_fence(true)?);
        }
        while self.image_acquired.len() < frames {
            self.image_acquired.push(self.gpu.create_semaphore()?);
        }
        while self.render_complete.len() < frames {
            self.render_complete.push(self.gpu.create_semaphore()?);
        }

        self.images_in_flight = vec![None; info.image_count as usize];
        self.image_count = info.image_count;
        self.max_frames_in_flight = frames;
        self.current_frame %= frames;
        self.extent = info.extent;

        debug!(
            "Sync objects sized for {} frame(s) in flight over {} image(s)",
            frames, info.image_count
        );
        Ok(())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[BackendState],
    ) -> RendererResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else if self.state == BackendState::Uninitialized {
            Err(RendererError::NotInitialized)
        } else {
            Err(RendererError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn state(&self) -> BackendState {
        self.state
    }

    #[inline]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Frame slot the next (or current) frame uses.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Image acquired by the most recent proceeding `begin_frame`.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    #[inline]
    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    #[inline]
    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    /// Number of (image acquired, render complete) semaphore pairs.
    #[inline]
    pub fn semaphore_pair_count(&self) -> usize {
        self.image_acquired.len().min(self.render_complete.len())
    }

    #[inline]
    pub fn images_in_flight(&self) -> &[Option<usize>] {
        &self.images_in_flight
    }

    /// Extent of the current render targets.
    #[inline]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Latest size requested through `initialize` or `resize`.
    #[inline]
    pub fn framebuffer_size(&self) -> Extent {
        self.framebuffer_size
    }

    #[inline]
    pub fn pending_resize(&self) -> PendingResize {
        self.pending_resize
    }

    /// Whether a rebuild is in progress. Always `false` between calls, since
    /// rebuilds run to completion inside `begin_frame`/`end_frame`.
    #[inline]
    pub fn is_recreating(&self) -> bool {
        self.recreating_swapchain
    }

    #[inline]
    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain_generation
    }

    /// Frames completed since initialization.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

impl<G: FrameGpu> Drop for Context<G> {
    fn drop(&mut self) {
        if self.state != BackendState::Destroyed
            && let Err(e) = self.shutdown()
        {
            error!("Failed to shut down render context: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null::NullGpu;

    fn initialized(image_count: u32) -> Context<NullGpu> {
        let mut context = Context::new(NullGpu::new(image_count), u64::MAX);
        context.initialize(240, 240).unwrap();
        context
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BackendState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(BackendState::Drawing.to_string(), "drawing");
    }

    #[test]
    fn test_initialize_sizes_sync_arrays() {
        let context = initialized(3);
        assert_eq!(context.state(), BackendState::Initialized);
        assert_eq!(context.image_count(), 3);
        assert_eq!(context.max_frames_in_flight(), 2);
        assert_eq!(context.fence_count(), 2);
        assert_eq!(context.semaphore_pair_count(), 2);
        assert_eq!(context.images_in_flight(), &[None, None, None]);
    }

    #[test]
    fn test_begin_frame_before_initialize() {
        let mut context = Context::new(NullGpu::new(3), u64::MAX);
        assert!(matches!(
            context.begin_frame(0.0),
            Err(RendererError::NotInitialized)
        ));
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut context = initialized(3);
        let err = context.initialize(240, 240).unwrap_err();
        assert!(matches!(
            err,
            RendererError::InvalidState {
                operation: "initialize",
                state: BackendState::Initialized
            }
        ));
    }

    #[test]
    fn test_end_frame_without_begin() {
        let mut context = initialized(3);
        assert!(matches!(
            context.end_frame(0.0),
            Err(RendererError::InvalidState { operation: "end_frame", .. })
        ));
    }

    #[test]
    fn test_draw_outside_frame_is_rejected() {
        let mut context = initialized(3);
        assert!(context.update_object(Mat4::IDENTITY).is_err());
        assert!(context.update_global_state(&GlobalUniform::default()).is_err());
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut context = initialized(3);
        assert_eq!(context.begin_frame(0.0).unwrap(), FrameStatus::Proceed);
        assert!(context.begin_frame(0.0).is_err());
        context.end_frame(0.0).unwrap();
        assert_eq!(context.state(), BackendState::Ready);
    }

    #[test]
    fn test_zero_resize_is_ignored() {
        let mut context = initialized(3);
        context.resize(0, 480);
        assert_eq!(context.pending_resize().generation, 0);
        assert_eq!(context.begin_frame(0.0).unwrap(), FrameStatus::Proceed);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut context = initialized(3);
        context.shutdown().unwrap();
        assert_eq!(context.state(), BackendState::Destroyed);
        assert_eq!(context.fence_count(), 0);
        context.shutdown().unwrap();
        assert!(context.begin_frame(0.0).is_err());
    }
}
