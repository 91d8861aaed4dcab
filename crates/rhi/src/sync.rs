//! Synchronization primitives for Vulkan.
//!
//! - [`Semaphore`] orders queue operations on the GPU (acquire → submit → present)
//! - [`Fence`] lets the host wait for submitted work, with a shadow flag that
//!   skips waits on a fence already known to be signaled
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::device::Device;
//! use framepace_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framepace_rhi::RhiError> {
//! let image_acquired = Semaphore::new(device.clone())?;
//!
//! // Created signaled so the first frame does not block
//! let mut in_flight = Fence::new(device.clone(), true)?;
//!
//! if in_flight.wait(u64::MAX)? {
//!     in_flight.reset()?;
//!     // ... submit work signalling `in_flight` ...
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{trace, warn};

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan semaphore wrapper for GPU-to-GPU ordering.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        trace!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        trace!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper for GPU-to-CPU synchronization.
///
/// `is_signaled` mirrors what the host last observed: it is set by a
/// successful wait (or creation in the signaled state) and cleared by
/// [`Fence::reset`]. The host never learns of a signal any other way, so the
/// flag can only lag behind the GPU, never run ahead of it.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
    is_signaled: bool,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Create in the signaled state so the first wait returns immediately
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        trace!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device,
            fence,
            is_signaled: signaled,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Whether the host has observed this fence signaled since its last reset.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.is_signaled
    }

    /// Waits for the fence.
    ///
    /// Returns `Ok(true)` once signaled, `Ok(false)` if `timeout_ns` elapsed
    /// first. A fence already flagged signaled returns without touching the
    /// driver.
    ///
    /// # Errors
    ///
    /// Returns an error for any driver result other than success or timeout
    /// (for example device loss).
    pub fn wait(&mut self, timeout_ns: u64) -> RhiResult<bool> {
        if self.is_signaled {
            return Ok(true);
        }

        let fences = [self.fence];
        match unsafe { self.device.handle().wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => {
                self.is_signaled = true;
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => {
                warn!("Fence wait timed out after {} ns", timeout_ns);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// Only talks to the driver when the fence is flagged signaled; an
    /// unsignaled fence is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reset fails.
    pub fn reset(&mut self) -> RhiResult<()> {
        if self.is_signaled {
            let fences = [self.fence];
            unsafe { self.device.handle().reset_fences(&fences)? };
            self.is_signaled = false;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        trace!("Destroyed fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }
}
