//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` in RAII types that each hold an `Arc<Device>` and
//! release their Vulkan object on drop. It covers:
//! - Instance, surface, physical device selection and logical device creation
//! - Swapchain creation, acquisition, presentation and in-place recreation
//! - Command buffers with a tracked lifecycle state
//! - Fences and semaphores
//! - Buffers and images backed by gpu-allocator
//! - Render pass, framebuffers, shaders, pipelines and descriptors

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
