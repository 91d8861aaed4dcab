//! Command pool and command buffer management.
//!
//! This module provides wrappers for VkCommandPool and VkCommandBuffer,
//! enabling safe recording and submission of Vulkan commands.
//!
//! # Overview
//!
//! - [`CommandPool`] manages VkCommandPool creation
//! - [`CommandBuffer`] wraps VkCommandBuffer and tracks its lifecycle in a
//!   [`CommandBufferState`]
//!
//! The lifecycle is:
//!
//! ```text
//! NotAllocated -allocate-> Ready -begin-> Recording -begin_render_pass-> InRenderPass
//! InRenderPass -end_render_pass-> Recording -end-> RecordingEnded -submit-> Submitted
//! (any allocated state) -reset-> Ready -free-> NotAllocated
//! ```
//!
//! Calling an operation from the wrong state is a bug in the caller and
//! panics before anything is sent to the driver or the state changes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::device::Device;
//! use framepace_rhi::command::{CommandBuffer, CommandPool};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framepace_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.queue_families().graphics)?;
//!
//! // One-off transfer work: blocks until the queue is idle, then frees itself
//! let cmd = CommandBuffer::begin_single_use(device.clone(), &pool)?;
//! // ... record a copy ...
//! cmd.end_single_use(device.graphics_queue())?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{info, trace};

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// A command pool is used to allocate command buffers. Each pool is associated
/// with a specific queue family and can only allocate command buffers that
/// will be submitted to queues of that family.
///
/// Command buffers must be dropped before the pool that allocated them.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a new command pool for the specified queue family.
    ///
    /// The pool is created with the `RESET_COMMAND_BUFFER` flag, allowing
    /// individual command buffers to be reset without resetting the entire pool.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool belongs to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
}

/// Operations that move a [`CommandBuffer`] between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOp {
    Allocate,
    Begin,
    BeginRenderPass,
    EndRenderPass,
    End,
    Submit,
    Reset,
    Free,
}

impl CommandBufferState {
    /// The state reached by applying `op`, or `None` if `op` is not allowed here.
    pub fn apply(self, op: CommandOp) -> Option<Self> {
        use CommandBufferState::*;

        match (self, op) {
            (NotAllocated, CommandOp::Allocate) => Some(Ready),
            (Ready, CommandOp::Begin) => Some(Recording),
            (Recording, CommandOp::BeginRenderPass) => Some(InRenderPass),
            (InRenderPass, CommandOp::EndRenderPass) => Some(Recording),
            (Recording, CommandOp::End) => Some(RecordingEnded),
            (RecordingEnded, CommandOp::Submit) => Some(Submitted),
            (NotAllocated, CommandOp::Reset | CommandOp::Free) => None,
            (_, CommandOp::Reset) => Some(Ready),
            (_, CommandOp::Free) => Some(NotAllocated),
            _ => None,
        }
    }

    /// Whether commands may be recorded.
    #[inline]
    pub fn is_recording(self) -> bool {
        matches!(
            self,
            CommandBufferState::Recording | CommandBufferState::InRenderPass
        )
    }
}

impl fmt::Display for CommandBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Applies `op` to `state`, panicking on an invalid transition.
fn checked_transition(state: CommandBufferState, op: CommandOp) -> CommandBufferState {
    match state.apply(op) {
        Some(next) => next,
        None => panic!("invalid command buffer transition: {op:?} while {state}"),
    }
}

// =============================================================================
// Command Buffer
// =============================================================================

/// Vulkan command buffer wrapper with tracked state.
///
/// Freed back to its pool on drop unless already freed.
pub struct CommandBuffer {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    /// Allocates a command buffer from `pool`. The buffer starts out `Ready`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `pool` - The command pool to allocate from
    /// * `primary` - Primary (submittable) or secondary level
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate(device: Arc<Device>, pool: &CommandPool, primary: bool) -> RhiResult<Self> {
        let state = checked_transition(CommandBufferState::NotAllocated, CommandOp::Allocate);

        let level = if primary {
            vk::CommandBufferLevel::PRIMARY
        } else {
            vk::CommandBufferLevel::SECONDARY
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .level(level)
            .command_buffer_count(1);

        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };

        trace!("Allocated {:?} command buffer", level);

        Ok(Self {
            device,
            pool: pool.handle(),
            buffer: buffers[0],
            state,
        })
    }

    /// Allocates a primary buffer and begins it for one-time submission.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or begin fails.
    pub fn begin_single_use(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let mut cmd = Self::allocate(device, pool, true)?;
        cmd.begin(true, false, false)?;
        Ok(cmd)
    }

    /// Ends, submits and waits for a buffer from [`CommandBuffer::begin_single_use`].
    ///
    /// Blocks until `queue` is idle; no fence is involved. The buffer is freed
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if end, submit or the idle wait fails.
    pub fn end_single_use(mut self, queue: vk::Queue) -> RhiResult<()> {
        self.end()?;
        self.submit(queue, &[], &[], &[], vk::Fence::null())?;
        self.device.queue_wait_idle(queue)?;
        self.free();
        Ok(())
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording.
    ///
    /// # Arguments
    ///
    /// * `single_use` - Recorded once and submitted once
    /// * `render_pass_continue` - Secondary buffer entirely inside a render pass
    /// * `simultaneous_use` - May be pending on several queues at once
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the begin.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Ready`.
    pub fn begin(
        &mut self,
        single_use: bool,
        render_pass_continue: bool,
        simultaneous_use: bool,
    ) -> RhiResult<()> {
        let next = checked_transition(self.state, CommandOp::Begin);

        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if render_pass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        self.state = next;
        Ok(())
    }

    /// Begins a render pass with inline subpass contents.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Recording`.
    pub fn begin_render_pass(&mut self, begin_info: &vk::RenderPassBeginInfo) {
        let next = checked_transition(self.state, CommandOp::BeginRenderPass);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        self.state = next;
    }

    /// Ends the current render pass.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `InRenderPass`.
    pub fn end_render_pass(&mut self) {
        let next = checked_transition(self.state, CommandOp::EndRenderPass);

        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }

        self.state = next;
    }

    /// Ends recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reports a recording failure.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `Recording` (an open render pass must be
    /// ended first).
    pub fn end(&mut self) -> RhiResult<()> {
        let next = checked_transition(self.state, CommandOp::End);

        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }

        self.state = next;
        Ok(())
    }

    /// Submits the buffer to `queue`.
    ///
    /// # Arguments
    ///
    /// * `wait_semaphores` - Semaphores to wait on, paired with `wait_stages`
    /// * `wait_stages` - Pipeline stage at which each wait happens
    /// * `signal_semaphores` - Semaphores signaled on completion
    /// * `fence` - Fence signaled on completion, or null
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails; the state is left unchanged.
    ///
    /// # Panics
    ///
    /// Panics unless the buffer is `RecordingEnded`.
    pub fn submit(
        &mut self,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let next = checked_transition(self.state, CommandOp::Submit);

        let command_buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], fence)?;
        }

        self.state = next;
        Ok(())
    }

    /// Resets the buffer to `Ready`, discarding anything recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reset fails.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has been freed.
    pub fn reset(&mut self) -> RhiResult<()> {
        let next = checked_transition(self.state, CommandOp::Reset);

        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }

        self.state = next;
        Ok(())
    }

    /// Returns the buffer to its pool.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has already been freed.
    pub fn free(&mut self) {
        let next = checked_transition(self.state, CommandOp::Free);

        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[self.buffer]);
        }

        self.buffer = vk::CommandBuffer::null();
        self.state = next;
    }

    fn assert_recording(&self) {
        assert!(
            self.state.is_recording(),
            "command recorded while command buffer is {}",
            self.state
        );
    }

    // =========================================================================
    // Pipeline Binding
    // =========================================================================

    /// Binds a pipeline to the command buffer.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.assert_recording();
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    /// Binds vertex buffers to the command buffer.
    ///
    /// # Arguments
    ///
    /// * `first_binding` - First vertex input binding to update
    /// * `buffers` - Slice of buffer handles
    /// * `offsets` - Byte offsets into each buffer
    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.assert_recording();
        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    /// Binds an index buffer to the command buffer.
    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.assert_recording();
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    /// Binds descriptor sets to the command buffer.
    ///
    /// # Arguments
    ///
    /// * `bind_point` - Whether this is for graphics or compute
    /// * `layout` - The pipeline layout
    /// * `first_set` - First descriptor set to update
    /// * `descriptor_sets` - Slice of descriptor sets
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.assert_recording();
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        self.assert_recording();
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        self.assert_recording();
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    // =========================================================================
    // Drawing Commands
    // =========================================================================

    /// Issues an indexed draw command.
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.assert_recording();
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    // =========================================================================
    // Push Constants
    // =========================================================================

    /// Updates push constant data.
    ///
    /// # Arguments
    ///
    /// * `layout` - Pipeline layout containing push constant ranges
    /// * `stages` - Shader stages that will use the push constants
    /// * `offset` - Byte offset within push constant memory
    /// * `data` - Data to push
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        self.assert_recording();
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                offset,
                bytemuck::bytes_of(data),
            );
        }
    }

    // =========================================================================
    // Copy Commands
    // =========================================================================

    /// Copies data between buffers.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.assert_recording();
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // Owners wait for the device before dropping submitted buffers.
        if self.state != CommandBufferState::NotAllocated {
            self.free();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    use super::CommandBufferState::*;

    /// Folds `ops` over `start`, panicking on the first invalid step.
    fn run(start: CommandBufferState, ops: &[CommandOp]) -> CommandBufferState {
        ops.iter().fold(start, |state, &op| checked_transition(state, op))
    }

    #[test]
    fn test_full_frame_sequence() {
        let ops = [
            CommandOp::Allocate,
            CommandOp::Begin,
            CommandOp::BeginRenderPass,
            CommandOp::EndRenderPass,
            CommandOp::End,
            CommandOp::Submit,
        ];
        assert_eq!(run(NotAllocated, &ops), Submitted);
        assert_eq!(run(Submitted, &[CommandOp::Reset]), Ready);
        assert_eq!(run(Ready, &[CommandOp::Free]), NotAllocated);
    }

    #[test]
    fn test_every_prefix_ends_in_last_reached_state() {
        let ops = [
            (CommandOp::Allocate, Ready),
            (CommandOp::Begin, Recording),
            (CommandOp::BeginRenderPass, InRenderPass),
            (CommandOp::EndRenderPass, Recording),
            (CommandOp::BeginRenderPass, InRenderPass),
            (CommandOp::EndRenderPass, Recording),
            (CommandOp::End, RecordingEnded),
            (CommandOp::Submit, Submitted),
            (CommandOp::Reset, Ready),
        ];

        let mut state = NotAllocated;
        for (op, expected) in ops {
            state = checked_transition(state, op);
            assert_eq!(state, expected, "after {op:?}");
        }
    }

    #[test]
    fn test_reset_from_any_allocated_state() {
        for state in [Ready, Recording, InRenderPass, RecordingEnded, Submitted] {
            assert_eq!(state.apply(CommandOp::Reset), Some(Ready));
        }
        assert_eq!(NotAllocated.apply(CommandOp::Reset), None);
        assert_eq!(NotAllocated.apply(CommandOp::Free), None);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert_eq!(Ready.apply(CommandOp::BeginRenderPass), None);
        assert_eq!(Ready.apply(CommandOp::End), None);
        assert_eq!(Ready.apply(CommandOp::Submit), None);
        assert_eq!(Recording.apply(CommandOp::Begin), None);
        assert_eq!(Recording.apply(CommandOp::EndRenderPass), None);
        assert_eq!(InRenderPass.apply(CommandOp::End), None);
        assert_eq!(InRenderPass.apply(CommandOp::BeginRenderPass), None);
        assert_eq!(RecordingEnded.apply(CommandOp::Begin), None);
        assert_eq!(Submitted.apply(CommandOp::Submit), None);
        assert_eq!(Submitted.apply(CommandOp::Begin), None);
        assert_eq!(Ready.apply(CommandOp::Allocate), None);
    }

    #[test]
    #[should_panic(expected = "BeginRenderPass while Ready")]
    fn test_begin_render_pass_while_ready_panics() {
        checked_transition(Ready, CommandOp::BeginRenderPass);
    }

    #[test]
    fn test_rejected_transition_leaves_state_untouched() {
        let mut state = Recording;
        let result = panic::catch_unwind(|| checked_transition(state, CommandOp::Submit));
        assert!(result.is_err());

        // The panic fired before any assignment could happen
        assert_eq!(state, Recording);
        state = checked_transition(state, CommandOp::End);
        assert_eq!(state, RecordingEnded);
    }

    #[test]
    fn test_is_recording() {
        assert!(Recording.is_recording());
        assert!(InRenderPass.is_recording());
        assert!(!Ready.is_recording());
        assert!(!RecordingEnded.is_recording());
    }
}
