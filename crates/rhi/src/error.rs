//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// The instance reported no physical devices at all
    #[error("No Vulkan physical device found")]
    NoPhysicalDevice,

    /// The selected GPU has no queue family for a required role
    #[error("No queue family supports the {0} role")]
    MissingQueueFamily(&'static str),

    /// None of the candidate depth formats is usable as an attachment
    #[error("No supported depth attachment format")]
    NoDepthFormat,

    /// Shader module error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Buffer misuse (out-of-range access, invalid resize)
    #[error("Buffer error: {0}")]
    Buffer(String),
}

impl RhiError {
    /// The raw driver code behind this error, if it came from the driver.
    pub fn vk_result(&self) -> Option<ash::vk::Result> {
        match self {
            RhiError::Vulkan(result) => Some(*result),
            _ => None,
        }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
