//! The Vulkan backend.
//!
//! # Overview
//!
//! [`VulkanGpu`] implements [`FrameGpu`] on top of `framepace_rhi`: it owns the
//! swap chain (with its depth attachment), the render pass, one framebuffer
//! and one command buffer per swap-chain image, the object shader and the
//! quad it draws. [`VulkanBackend`] creates the instance, surface and device,
//! hands them to a [`Context<VulkanGpu>`] and tears everything down in
//! reverse dependency order.
//!
//! # Destruction Order
//!
//! 1. Per-frame fences and semaphores (owned by the context)
//! 2. Command buffers, object shader and quad
//! 3. Framebuffers
//! 4. Render pass
//! 5. Swap chain and its depth attachment
//! 6. Device
//! 7. Surface
//! 8. Instance

use std::path::PathBuf;
use std::sync::Arc;

use framepace_core::RendererConfig;
use framepace_rhi::buffer::{Buffer, BufferUsage};
use framepace_rhi::command::{CommandBuffer, CommandPool};
use framepace_rhi::device::Device;
use framepace_rhi::framebuffer::Framebuffer;
use framepace_rhi::instance::Instance;
use framepace_rhi::physical_device::select_physical_device;
use framepace_rhi::pipeline::{flipped_viewport, full_scissor};
use framepace_rhi::render_pass::RenderPass;
use framepace_rhi::surface::Surface;
use framepace_rhi::swapchain::{AcquireResult, PresentResult, Swapchain};
use framepace_rhi::sync::{Fence, Semaphore};
use framepace_rhi::vertex;
use framepace_rhi::{RhiError, vk};
use glam::{Mat4, Vec3, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::backend::RendererBackend;
use crate::context::{BackendState, Context, FrameStatus};
use crate::error::{RendererError, RendererResult};
use crate::gpu::{AcquireOutcome, Extent, FrameFence, FrameGpu, PresentOutcome, TargetInfo};
use crate::object_shader::ObjectShader;
use crate::ubo::GlobalUniform;

/// Side of the demo quad in world units.
const QUAD_SIZE: f32 = 10.0;

impl FrameFence for Fence {
    fn wait(&mut self, timeout_ns: u64) -> RendererResult<bool> {
        Ok(Fence::wait(self, timeout_ns)?)
    }

    fn reset(&mut self) -> RendererResult<()> {
        Ok(Fence::reset(self)?)
    }

    fn is_signaled(&self) -> bool {
        Fence::is_signaled(self)
    }
}

/// Vertex and index buffers of the demo quad.
struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl Mesh {
    fn quad(device: &Arc<Device>, pool: &CommandPool) -> RendererResult<Self> {
        let (vertices, indices) = vertex::quad(QUAD_SIZE);
        let queue = device.graphics_queue();

        let vertex_buffer = Buffer::upload_staged(
            device.clone(),
            pool,
            queue,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&vertices),
        )?;
        let index_buffer = Buffer::upload_staged(
            device.clone(),
            pool,
            queue,
            BufferUsage::Index,
            bytemuck::cast_slice(&indices),
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    fn draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        cmd.bind_index_buffer(self.index_buffer.handle(), 0, vk::IndexType::UINT32);
        cmd.draw_indexed(self.index_count, 1, 0, 0, 0);
    }
}

// ============================================================================
// VulkanGpu
// ============================================================================

/// [`FrameGpu`] over a Vulkan device and window surface.
///
/// Everything image-count sized is created by the first
/// [`FrameGpu::build_targets`] and rebuilt in place by later ones. Fields are
/// `Option`s so [`FrameGpu::release`] can destroy them in a fixed order.
pub struct VulkanGpu {
    command_buffers: Vec<CommandBuffer>,
    object_shader: Option<ObjectShader>,
    mesh: Option<Mesh>,
    framebuffers: Vec<Framebuffer>,
    render_pass: Option<RenderPass>,
    command_pool: Option<CommandPool>,
    swapchain: Option<Swapchain>,

    device: Arc<Device>,
    surface: Arc<Surface>,
    instance: Arc<Instance>,

    clear_color: [f32; 4],
    prefer_mailbox: bool,
    shader_dir: PathBuf,
}

impl VulkanGpu {
    pub fn new(
        instance: Arc<Instance>,
        surface: Arc<Surface>,
        device: Arc<Device>,
        config: &RendererConfig,
    ) -> Self {
        Self {
            command_buffers: Vec::new(),
            object_shader: None,
            mesh: None,
            framebuffers: Vec::new(),
            render_pass: None,
            command_pool: None,
            swapchain: None,
            device,
            surface,
            instance,
            clear_color: config.clear_color,
            prefer_mailbox: config.prefer_mailbox,
            shader_dir: PathBuf::from(&config.shader_dir),
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    fn targets(&self) -> RendererResult<(&Swapchain, &RenderPass)> {
        match (&self.swapchain, &self.render_pass) {
            (Some(swapchain), Some(render_pass)) => Ok((swapchain, render_pass)),
            _ => Err(RendererError::NotInitialized),
        }
    }

    fn command_buffer(&mut self, image: u32) -> RendererResult<&mut CommandBuffer> {
        self.command_buffers
            .get_mut(image as usize)
            .ok_or(RendererError::NotInitialized)
    }

    /// First build: swap chain, then the objects that only depend on its
    /// format.
    fn create_targets(&mut self, width: u32, height: u32) -> RendererResult<()> {
        let swapchain = Swapchain::new(
            &self.instance,
            self.device.clone(),
            &self.surface,
            width,
            height,
            self.prefer_mailbox,
        )?;

        let render_pass = RenderPass::new(
            self.device.clone(),
            swapchain.format(),
            swapchain.depth_format(),
            self.clear_color,
        )?;

        let command_pool =
            CommandPool::new(self.device.clone(), self.device.queue_families().graphics)?;

        self.object_shader = ObjectShader::load(
            self.device.clone(),
            &self.shader_dir,
            &render_pass,
            swapchain.image_count(),
        )?;
        if self.object_shader.is_some() {
            self.mesh = Some(Mesh::quad(&self.device, &command_pool)?);
        }

        self.swapchain = Some(swapchain);
        self.render_pass = Some(render_pass);
        self.command_pool = Some(command_pool);
        Ok(())
    }

    /// Framebuffers and command buffers, one per swap-chain image.
    fn create_per_image(&mut self) -> RendererResult<()> {
        self.command_buffers.clear();
        self.framebuffers.clear();

        let (swapchain, render_pass) = self.targets()?;
        let extent = swapchain.extent();
        let depth_view = swapchain.depth_view();

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(self.device.clone(), render_pass, extent, &[view, depth_view])
            })
            .collect::<Result<Vec<_>, _>>()?;
        let image_count = swapchain.image_count();

        let pool = self
            .command_pool
            .as_ref()
            .ok_or(RendererError::NotInitialized)?;
        let command_buffers = (0..image_count)
            .map(|_| CommandBuffer::allocate(self.device.clone(), pool, true))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(shader) = self.object_shader.as_mut() {
            shader.ensure_image_count(image_count)?;
        }

        self.framebuffers = framebuffers;
        self.command_buffers = command_buffers;

        debug!(
            "Created {} framebuffer(s) and command buffer(s)",
            image_count
        );
        Ok(())
    }
}

impl FrameGpu for VulkanGpu {
    type Fence = Fence;
    type Semaphore = Semaphore;

    fn create_fence(&mut self, signaled: bool) -> RendererResult<Fence> {
        Ok(Fence::new(self.device.clone(), signaled)?)
    }

    fn create_semaphore(&mut self) -> RendererResult<Semaphore> {
        Ok(Semaphore::new(self.device.clone())?)
    }

    fn build_targets(&mut self, width: u32, height: u32) -> RendererResult<TargetInfo> {
        match self.swapchain.as_mut() {
            Some(swapchain) => {
                // Command buffers and framebuffers reference the old images
                self.command_buffers.clear();
                self.framebuffers.clear();
                swapchain.recreate(&self.surface, width, height)?;
            }
            None => self.create_targets(width, height)?,
        }

        self.create_per_image()?;

        let (swapchain, _) = self.targets()?;
        let extent = swapchain.extent();
        Ok(TargetInfo {
            image_count: swapchain.image_count(),
            max_frames_in_flight: swapchain.max_frames_in_flight(),
            extent: Extent::new(extent.width, extent.height),
        })
    }

    fn acquire_next_image(
        &mut self,
        signal: &Semaphore,
        timeout_ns: u64,
    ) -> RendererResult<AcquireOutcome> {
        let (swapchain, _) = self.targets()?;
        Ok(
            match swapchain.acquire_next_image(signal.handle(), timeout_ns)? {
                AcquireResult::Acquired { index, suboptimal } => {
                    if suboptimal {
                        debug!("Acquired image {} from a suboptimal swapchain", index);
                    }
                    AcquireOutcome::Acquired(index)
                }
                AcquireResult::Stale => AcquireOutcome::Stale,
                AcquireResult::TimedOut => AcquireOutcome::TimedOut,
            },
        )
    }

    fn present(&mut self, image: u32, wait: &Semaphore) -> RendererResult<PresentOutcome> {
        let (swapchain, _) = self.targets()?;
        Ok(
            match swapchain.present(self.device.present_queue(), image, wait.handle())? {
                PresentResult::Presented => PresentOutcome::Presented,
                PresentResult::Stale => PresentOutcome::Stale,
            },
        )
    }

    fn begin_recording(&mut self, image: u32, extent: Extent) -> RendererResult<()> {
        let extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        let framebuffer = self
            .framebuffers
            .get(image as usize)
            .map(Framebuffer::handle)
            .ok_or(RendererError::NotInitialized)?;
        let render_pass = self
            .render_pass
            .as_ref()
            .ok_or(RendererError::NotInitialized)?;
        let cmd = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(RendererError::NotInitialized)?;

        cmd.reset()?;
        cmd.begin(false, false, false)?;
        cmd.set_viewport(&flipped_viewport(extent));
        cmd.set_scissor(&full_scissor(extent));
        render_pass.begin(cmd, framebuffer, full_scissor(extent));
        Ok(())
    }

    fn end_recording(&mut self, image: u32) -> RendererResult<()> {
        let render_pass = self
            .render_pass
            .as_ref()
            .ok_or(RendererError::NotInitialized)?;
        let cmd = self
            .command_buffers
            .get_mut(image as usize)
            .ok_or(RendererError::NotInitialized)?;
        render_pass.end(cmd);
        cmd.end()?;
        Ok(())
    }

    fn update_global_state(&mut self, image: u32, uniform: &GlobalUniform) -> RendererResult<()> {
        let Some(shader) = self.object_shader.as_ref() else {
            return Ok(());
        };
        let cmd = self
            .command_buffers
            .get(image as usize)
            .ok_or(RendererError::NotInitialized)?;
        shader.use_global(cmd, image as usize, uniform)
    }

    fn update_object(&mut self, image: u32, model: Mat4) -> RendererResult<()> {
        let (Some(shader), Some(mesh)) = (self.object_shader.as_ref(), self.mesh.as_ref()) else {
            return Ok(());
        };
        let cmd = self
            .command_buffers
            .get(image as usize)
            .ok_or(RendererError::NotInitialized)?;
        shader.push_model(cmd, &model);
        mesh.draw(cmd);
        Ok(())
    }

    fn submit(
        &mut self,
        image: u32,
        wait: &Semaphore,
        signal: &Semaphore,
        fence: &mut Fence,
    ) -> RendererResult<()> {
        let queue = self.device.graphics_queue();
        let cmd = self.command_buffer(image)?;
        cmd.submit(
            queue,
            &[wait.handle()],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[signal.handle()],
            fence.handle(),
        )?;
        Ok(())
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        Ok(self.device.wait_idle()?)
    }

    fn release(&mut self) {
        self.command_buffers.clear();
        self.object_shader = None;
        self.mesh = None;
        self.command_pool = None;
        self.framebuffers.clear();
        self.render_pass = None;
        self.swapchain = None;
        debug!("Render targets released");
    }
}

// ============================================================================
// VulkanBackend
// ============================================================================

/// Anything that can hand out raw window and display handles.
pub trait WindowHandleSource: HasDisplayHandle + HasWindowHandle {}

impl<T: HasDisplayHandle + HasWindowHandle> WindowHandleSource for T {}

/// [`RendererBackend`] presenting to a window through Vulkan.
pub struct VulkanBackend {
    context: Option<Context<VulkanGpu>>,
    device: Option<Arc<Device>>,
    surface: Option<Arc<Surface>>,
    instance: Option<Arc<Instance>>,
    // Keeps the window alive for as long as the surface exists
    window: Arc<dyn WindowHandleSource>,
    config: RendererConfig,
    destroyed: bool,
}

impl VulkanBackend {
    /// Creates an uninitialized backend for `window`.
    pub fn new(window: Arc<dyn WindowHandleSource>, config: RendererConfig) -> Self {
        Self {
            context: None,
            device: None,
            surface: None,
            instance: None,
            window,
            config,
            destroyed: false,
        }
    }

    pub fn context(&self) -> Option<&Context<VulkanGpu>> {
        self.context.as_ref()
    }

    fn context_mut(&mut self) -> RendererResult<&mut Context<VulkanGpu>> {
        self.context.as_mut().ok_or(RendererError::NotInitialized)
    }

    fn destroy(&mut self) -> RendererResult<()> {
        if let Some(mut context) = self.context.take() {
            context.shutdown()?;
            self.destroyed = true;
        }
        if self.device.take().is_some() {
            debug!("Device released");
        }
        if self.surface.take().is_some() {
            debug!("Surface released");
        }
        if self.instance.take().is_some() {
            debug!("Instance released");
        }
        Ok(())
    }
}

impl RendererBackend for VulkanBackend {
    fn initialize(&mut self, app_name: &str, width: u32, height: u32) -> RendererResult<()> {
        let state = self.state();
        if state != BackendState::Uninitialized {
            return Err(RendererError::InvalidState {
                operation: "initialize",
                state,
            });
        }

        let display = self
            .window
            .display_handle()
            .map_err(|e| RhiError::Surface(format!("Failed to get display handle: {}", e)))?
            .as_raw();
        let window = self
            .window
            .window_handle()
            .map_err(|e| RhiError::Surface(format!("Failed to get window handle: {}", e)))?
            .as_raw();

        let instance = Arc::new(Instance::new(app_name, self.config.validation, Some(display))?);
        let surface = Arc::new(Surface::new(&instance, display, window)?);
        let physical = select_physical_device(&instance, &surface)?;
        let device = Device::new(&instance, &physical)?;

        info!("Rendering on {}", device.name());

        let gpu = VulkanGpu::new(
            instance.clone(),
            surface.clone(),
            device.clone(),
            &self.config,
        );
        let mut context = Context::new(gpu, self.config.fence_timeout_ns());
        context.initialize(width, height)?;

        self.instance = Some(instance);
        self.surface = Some(surface);
        self.device = Some(device);
        self.context = Some(context);

        info!("Vulkan backend initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> RendererResult<()> {
        self.destroy()?;
        info!("Vulkan backend shut down");
        Ok(())
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
        match &self.context {
            Some(context) => context.state(),
            None if self.destroyed => BackendState::Destroyed,
            None => BackendState::Uninitialized,
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::error!("Failed to shut down Vulkan backend: {}", e);
        }
    }
}
