//! GPU image management.
//!
//! [`Image`] owns a `VkImage`, its gpu-allocator allocation and an optional
//! view. Used for the swap chain's depth attachment; swap chain color images
//! are owned by the driver and never pass through here.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::RhiResult;

/// Parameters for [`Image::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    /// Aspect used for the view, if one is created.
    pub aspect: vk::ImageAspectFlags,
    pub location: MemoryLocation,
    pub create_view: bool,
}

impl ImageDesc {
    /// Depth attachment sized to `extent`, GPU-only, with a view.
    pub fn depth_attachment(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            location: MemoryLocation::GpuOnly,
            create_view: true,
        }
    }
}

/// 2D image with device memory and an optional view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: Option<vk::ImageView>,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl Image {
    /// Creates a single-mip, single-layer 2D image and binds memory to it.
    ///
    /// # Errors
    ///
    /// Returns an error if image creation, allocation, binding or view
    /// creation fails. Anything created before the failure is released.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.handle().create_image(&create_info, None)? };

        // From here on `Drop` cleans up whatever has been filled in.
        let mut this = Self {
            device,
            image,
            view: None,
            allocation: None,
            extent: desc.extent,
            format: desc.format,
        };

        let requirements = unsafe { this.device.handle().get_image_memory_requirements(image) };
        let allocation = this.device.allocator().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: desc.location,
            linear: desc.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            this.device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }
        this.allocation = Some(allocation);

        if desc.create_view {
            this.create_view(desc.format, desc.aspect)?;
        }

        debug!(
            "Created image {}x{} {:?}",
            desc.extent.width, desc.extent.height, desc.format
        );

        Ok(this)
    }

    /// Creates (or replaces) the image's view.
    ///
    /// # Errors
    ///
    /// Returns an error if view creation fails.
    pub fn create_view(
        &mut self,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { self.device.handle().create_image_view(&create_info, None)? };

        if let Some(old) = self.view.replace(view) {
            unsafe { self.device.handle().destroy_image_view(old, None) };
        }

        Ok(view)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// The image view, or a null handle when none was created.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.unwrap_or_default()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.view.take() {
                self.device.handle().destroy_image_view(view, None);
            }
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        debug!("Destroyed image {}x{}", self.extent.width, self.extent.height);
    }
}
