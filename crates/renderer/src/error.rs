//! Renderer error types.

use framepace_rhi::RhiError;
use thiserror::Error;

use crate::context::BackendState;

/// Errors raised by the frame orchestrator and its backends.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Failure reported by the Vulkan layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A frame operation was issued before `initialize`
    #[error("Renderer backend is not initialized")]
    NotInitialized,

    /// An operation was issued in a backend state that does not allow it
    #[error("{operation} is not valid while the backend is {state}")]
    InvalidState {
        operation: &'static str,
        state: BackendState,
    },

    /// Shader blob lookup or validation failure
    #[error("Shader error: {0}")]
    Shader(String),
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;
