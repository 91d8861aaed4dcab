//! Windowing for the framepace renderer.
//!
//! This crate provides:
//! - Window creation and size tracking via winit
//! - Raw window and display handles for Vulkan surface creation

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
