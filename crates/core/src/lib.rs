//! Core utilities shared by the framepace crates.
//!
//! This crate provides the foundation every other crate builds on:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame clock for delta time and fixed-rate pacing
//! - Configuration loaded from `framepace.toml`

mod config;
mod error;
mod logging;
mod timer;

pub use config::{Config, FrameConfig, LogConfig, RendererConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_with};
pub use timer::FrameClock;
