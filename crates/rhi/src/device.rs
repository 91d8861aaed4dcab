//! Logical device management.
//!
//! # Overview
//!
//! [`Device`] owns the `VkDevice`, one queue per role (graphics, present,
//! compute, transfer; roles may share a queue), the gpu-allocator instance,
//! the chosen depth format and the swapchain capability cache.
//!
//! The capability cache is the only mutable state: it is re-queried every time
//! the swapchain is built so format and extent negotiation always sees what the
//! surface reports right now.
//!
//! # Example
//!
//! ```no_run
//! use framepace_rhi::device::Device;
//! use framepace_rhi::instance::Instance;
//! use framepace_rhi::physical_device::select_physical_device;
//! # fn example(instance: &Instance, surface: &framepace_rhi::surface::Surface)
//! #     -> framepace_rhi::RhiResult<()> {
//! let info = select_physical_device(instance, surface)?;
//! let device = Device::new(instance, &info)?;
//! device.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::RhiResult;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::surface::Surface;
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions every platform needs.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Logical device wrapper with its queues and memory allocator.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    depth_format: vk::Format,
    swapchain_support: Mutex<SwapchainSupportDetails>,
}

impl Device {
    /// Creates the logical device for the selected GPU.
    ///
    /// One queue is created per unique queue family; roles sharing a family
    /// share the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if device or allocator creation fails.
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = info.queue_families;
        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE);

        let mut extension_names: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        if cfg!(target_os = "macos") {
            extension_names.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let transfer_queue = unsafe { device.get_device_queue(queue_families.transfer, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: info.device,
            device_name: info.device_name().to_string(),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            compute_queue,
            transfer_queue,
            queue_families,
            depth_format: info.depth_format,
            swapchain_support: Mutex::new(info.swapchain_support.clone()),
        }))
    }

    /// Returns the raw ash device.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.device_name
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Depth attachment format detected at selection time.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Locks the memory allocator.
    ///
    /// A poisoned lock is recovered: the allocator holds no invariant a
    /// panicking holder could have broken halfway.
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the cached swapchain capabilities.
    pub fn swapchain_support(&self) -> SwapchainSupportDetails {
        self.swapchain_support
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-queries surface capabilities, formats and present modes into the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a surface query fails.
    pub fn refresh_swapchain_support(&self, surface: &Surface) -> RhiResult<SwapchainSupportDetails> {
        let support =
            SwapchainSupportDetails::query(self.physical_device, surface.handle(), surface.loader())?;
        *self
            .swapchain_support
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = support.clone();
        Ok(support)
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Blocks until `queue` is idle.
    pub fn queue_wait_idle(&self, queue: vk::Queue) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(queue)? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// Every handle referenced by `submit_infos` must be valid, and `fence`
    /// must be null or unsignaled.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device, so it
            // must go first.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send+Sync, queue and physical device handles are plain
// handles, and the mutable state sits behind mutexes.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
