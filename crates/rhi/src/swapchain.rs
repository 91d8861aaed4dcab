//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! The [`Swapchain`] struct provides a safe abstraction over the Vulkan swapchain,
//! including:
//! - Surface capability querying (refreshed into the device cache on every build)
//! - Format and present mode selection
//! - Image views and the shared depth attachment
//! - In-place recreation when the surface goes stale or the window resizes
//!
//! Out-of-date and suboptimal surfaces are reported as [`AcquireResult::Stale`]
//! and [`PresentResult::Stale`], never as errors. Any other driver failure is
//! an `Err`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::device::Device;
//! use framepace_rhi::instance::Instance;
//! use framepace_rhi::surface::Surface;
//! use framepace_rhi::swapchain::{AcquireResult, Swapchain};
//! use framepace_rhi::sync::Semaphore;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: &Surface)
//! #     -> framepace_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(instance, device.clone(), surface, 240, 240, true)?;
//! let acquired = Semaphore::new(device)?;
//!
//! match swapchain.acquire_next_image(acquired.handle(), u64::MAX)? {
//!     AcquireResult::Acquired { index, .. } => { /* record and present `index` */ }
//!     AcquireResult::Stale => swapchain.recreate(surface, 240, 240)?,
//!     AcquireResult::TimedOut => { /* try again next tick */ }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc};
use crate::instance::Instance;
use crate::surface::Surface;

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Arguments
    ///
    /// * `physical_device` - The physical device to query
    /// * `surface` - The surface to query against
    /// * `surface_loader` - The surface extension loader
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Checks if the swapchain support is adequate for rendering.
    ///
    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Outcome of [`Swapchain::acquire_next_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image is ready. A suboptimal image is still usable this frame.
    Acquired { index: u32, suboptimal: bool },
    /// The surface is out of date; recreate before drawing.
    Stale,
    /// The timeout elapsed before an image became available.
    TimedOut,
}

/// Outcome of [`Swapchain::present`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    /// Out of date or suboptimal; recreate before the next frame.
    Stale,
}

/// Vulkan swapchain wrapper.
///
/// This struct manages the swapchain and its associated resources:
/// - Swapchain images (owned by the swapchain, not explicitly managed)
/// - Image views (managed by this struct)
/// - One depth attachment shared by every image
///
/// Recreation keeps the same `Swapchain` value and bumps [`Swapchain::generation`].
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    prefer_mailbox: bool,
    generation: u64,
}

/// Everything one build produces; swapped into [`Swapchain`] as a unit.
struct Built {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Image,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a new swapchain.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `device` - The logical device
    /// * `surface` - The window surface
    /// * `width` - Desired swapchain width
    /// * `height` - Desired swapchain height
    /// * `prefer_mailbox` - Use MAILBOX when the surface offers it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - The surface offers no format or present mode
    /// - Swapchain, image view or depth attachment creation fails
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: &Surface,
        width: u32,
        height: u32,
        prefer_mailbox: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let built = build(
            &device,
            &swapchain_loader,
            surface,
            width,
            height,
            prefer_mailbox,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain: built.swapchain,
            images: built.images,
            image_views: built.image_views,
            depth: Some(built.depth),
            format: built.format,
            color_space: built.color_space,
            extent: built.extent,
            present_mode: built.present_mode,
            prefer_mailbox,
            generation: 0,
        })
    }

    /// Rebuilds images, views and the depth attachment in place.
    ///
    /// Waits for the device to go idle first. The old swapchain handle is
    /// passed to the driver for reuse and destroyed once the new one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait or the rebuild fails. On a failed
    /// rebuild the swapchain keeps its old handle but has no views.
    pub fn recreate(&mut self, surface: &Surface, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!("Recreating swapchain for new size: {}x{}", width, height);

        self.destroy_image_views();
        self.depth = None;

        let built = build(
            &self.device,
            &self.swapchain_loader,
            surface,
            width,
            height,
            self.prefer_mailbox,
            self.swapchain,
        )?;

        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        self.swapchain = built.swapchain;
        self.images = built.images;
        self.image_views = built.image_views;
        self.depth = Some(built.depth);
        self.format = built.format;
        self.color_space = built.color_space;
        self.extent = built.extent;
        self.present_mode = built.present_mode;
        self.generation += 1;

        Ok(())
    }

    /// Acquires the next swapchain image for rendering.
    ///
    /// # Arguments
    ///
    /// * `semaphore` - Semaphore to signal when the image is available
    /// * `timeout_ns` - Timeout in nanoseconds (`u64::MAX` for unbounded)
    ///
    /// # Errors
    ///
    /// Returns an error for any driver result outside success, suboptimal,
    /// out-of-date, timeout and not-ready.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireResult> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Presents the rendered image to the screen.
    ///
    /// # Arguments
    ///
    /// * `queue` - The presentation queue
    /// * `image_index` - Index of the image to present (from `acquire_next_image`)
    /// * `wait_semaphore` - Semaphore to wait on before presenting
    ///
    /// # Errors
    ///
    /// Returns an error for any driver result outside success, suboptimal and
    /// out-of-date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentResult> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// How many frames may be recorded while the compositor holds one image.
    #[inline]
    pub fn max_frames_in_flight(&self) -> u32 {
        max_frames_in_flight(self.image_count())
    }

    /// Bumped by every [`Swapchain::recreate`].
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the image view at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// View of the shared depth attachment.
    #[inline]
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.as_ref().map(Image::view).unwrap_or_default()
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.device.depth_format()
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.depth = None;
        self.destroy_image_views();

        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

fn build(
    device: &Arc<Device>,
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: &Surface,
    width: u32,
    height: u32,
    prefer_mailbox: bool,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<Built> {
    let support = device.refresh_swapchain_support(surface)?;

    let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
        RhiError::Swapchain("Surface reports no formats".to_string())
    })?;
    if support.present_modes.is_empty() {
        return Err(RhiError::Swapchain(
            "Surface reports no present modes".to_string(),
        ));
    }
    let present_mode = choose_present_mode(&support.present_modes, prefer_mailbox);
    let extent = choose_extent(&support.capabilities, width, height);
    let image_count = determine_image_count(&support.capabilities);

    info!(
        "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
        extent.width,
        extent.height,
        surface_format.format,
        surface_format.color_space,
        present_mode,
        image_count
    );

    let queue_families = device.queue_families();
    let graphics_family = queue_families.graphics;
    let present_family = queue_families.present;
    let queue_family_indices = [graphics_family, present_family];

    let (sharing_mode, queue_family_indices_slice) = if graphics_family != present_family {
        debug!(
            "Using CONCURRENT sharing mode between graphics ({}) and present ({}) queues",
            graphics_family, present_family
        );
        (vk::SharingMode::CONCURRENT, queue_family_indices.as_slice())
    } else {
        (vk::SharingMode::EXCLUSIVE, &[][..])
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface.handle())
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(queue_family_indices_slice)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

    let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }
    };
    info!("Swapchain created with {} images", images.len());

    let image_views = match create_image_views(device, &images, surface_format.format) {
        Ok(views) => views,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e);
        }
    };

    let depth = Image::new(
        device.clone(),
        &ImageDesc::depth_attachment(extent, device.depth_format()),
    );
    let depth = match depth {
        Ok(depth) => depth,
        Err(e) => {
            unsafe {
                for &view in &image_views {
                    device.handle().destroy_image_view(view, None);
                }
                swapchain_loader.destroy_swapchain(swapchain, None);
            }
            return Err(e);
        }
    };

    Ok(Built {
        swapchain,
        images,
        image_views,
        depth,
        format: surface_format.format,
        color_space: surface_format.color_space,
        extent,
        present_mode,
    })
}

/// Maps the driver's acquire result onto [`AcquireResult`].
fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquireResult> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain out of date on acquire");
            Ok(AcquireResult::Stale)
        }
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireResult::TimedOut),
        Err(e) => Err(e.into()),
    }
}

/// Maps the driver's present result onto [`PresentResult`].
fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentResult> {
    match result {
        Ok(false) => Ok(PresentResult::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            debug!("Swapchain stale on present");
            Ok(PresentResult::Stale)
        }
        Err(e) => Err(e.into()),
    }
}

/// One image always belongs to the compositor; the rest may be in flight.
#[inline]
pub fn max_frames_in_flight(image_count: u32) -> u32 {
    image_count.saturating_sub(1).max(1)
}

/// Chooses the surface format.
///
/// Prefers B8G8R8A8_UNORM with SRGB_NONLINEAR color space, otherwise the
/// first format offered. Returns `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!(
            "Preferred surface format unavailable, using {:?} / {:?}",
            format.format, format.color_space
        );
    }
    first
}

/// Chooses the present mode.
///
/// MAILBOX when offered and wanted, otherwise FIFO, which every driver supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        width,
        height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// Determines the number of swapchain images.
///
/// One more than the minimum, clamped to the maximum when the driver sets one
/// (a maximum of 0 means unlimited).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for &view in &image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::Swapchain(format!(
                    "Failed to create image view {}: {:?}",
                    i, e
                )));
            }
        }
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_bgra_unorm() {
        let formats = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_requires_matching_color_space() {
        let formats = vec![
            surface_format(vk::Format::R16G16B16A16_SFLOAT),
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![surface_format(vk::Format::R8G8B8A8_UNORM)];

        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);

        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode_prefers_mailbox() {
        let modes = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 3000);
        assert_eq!((extent.width, extent.height), (2000, 2000));

        let extent = choose_extent(&capabilities, 50, 50);
        assert_eq!((extent.width, extent.height), (100, 100));

        let extent = choose_extent(&capabilities, 240, 240);
        assert_eq!((extent.width, extent.height), (240, 240));
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        let count = determine_image_count(&capabilities);
        assert_eq!(count, 3);
        assert_eq!(max_frames_in_flight(count), 2);

        // Clamped by the maximum
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        // 0 means no limit
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 4);
    }

    #[test]
    fn test_max_frames_in_flight_never_zero() {
        assert_eq!(max_frames_in_flight(1), 1);
        assert_eq!(max_frames_in_flight(2), 1);
        assert_eq!(max_frames_in_flight(4), 3);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((1, false))).unwrap(),
            AcquireResult::Acquired {
                index: 1,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            AcquireResult::Acquired {
                index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireResult::Stale
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(),
            AcquireResult::TimedOut
        );

        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentResult::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentResult::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentResult::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_formats = SwapchainSupportDetails {
            formats: vec![],
            ..adequate.clone()
        };
        assert!(!no_formats.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }
}
