//! Frame pacing and rendering.
//!
//! This crate drives one presented frame per tick:
//! - [`Context`]: the backend-agnostic begin-frame/end-frame protocol over a [`FrameGpu`]
//! - [`RendererBackend`]: [`VulkanBackend`] for a window, [`NullBackend`] for headless runs
//! - [`Renderer`]: the frontend turning a [`RenderPacket`] into a frame

mod backend;
mod context;
mod error;
mod frontend;
mod gpu;
mod null;
mod object_shader;
mod ubo;
mod vulkan;

pub use backend::RendererBackend;
pub use context::{BackendState, Context, FrameStatus, PendingResize};
pub use error::{RendererError, RendererResult};
pub use frontend::{RenderPacket, Renderer};
pub use gpu::{AcquireOutcome, Extent, FrameFence, FrameGpu, PresentOutcome, TargetInfo};
pub use null::{NullBackend, NullFence, NullGpu, NullSemaphore, NullStats};
pub use object_shader::{OBJECT_SHADER_NAME, ObjectShader};
pub use ubo::{GlobalUniform, OBJECT_PUSH_CONSTANT_SIZE};
pub use vulkan::{VulkanBackend, VulkanGpu, WindowHandleSource};
