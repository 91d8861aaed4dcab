//! Presentation surface.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::instance::Instance;

/// RAII wrapper for a Vulkan surface.
///
/// The caller must keep the [`Instance`] alive until this surface is dropped.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for a native window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window system is unsupported or surface creation fails.
    pub fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        // SAFETY: the handles come from a live window that outlives the surface,
        // and the instance was created with the extensions this display needs.
        let handle = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)?
        };

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        info!("Vulkan surface created");

        Ok(Self {
            handle,
            surface_loader,
        })
    }

    /// Get the raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Get the surface extension loader used for capability queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}
