//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! Selection is deliberately simple:
//! 1. Enumerate the GPUs and take the first one reported by the instance
//! 2. Walk its queue families once, greedily assigning graphics, present,
//!    compute and transfer roles
//! 3. Query and cache swapchain support and the depth attachment format
//!
//! A GPU that cannot provide all four roles is not a supported target and
//! selection fails.
//!
//! # Example
//!
//! ```no_run
//! use framepace_rhi::instance::Instance;
//! use framepace_rhi::physical_device::select_physical_device;
//! # fn example(instance: &Instance, surface: &framepace_rhi::surface::Surface)
//! #     -> framepace_rhi::RhiResult<()> {
//! let device_info = select_physical_device(instance, surface)?;
//! println!("Selected GPU: {:?}", device_info.device_name());
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::surface::Surface;
use crate::swapchain::SwapchainSupportDetails;

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices for the four queue roles. Roles may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Returns the unique queue family indices, in role order.
    ///
    /// One queue is created per unique family when the logical device is built.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(4);
        for family in [self.graphics, self.present, self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// What a queue family offers, as seen by the selector.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamilyCandidate {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub present_supported: bool,
}

impl QueueFamilyCandidate {
    fn usable(&self) -> bool {
        self.queue_count > 0
    }
}

/// Assigns queue roles to families.
///
/// A single pass visits the families in order and hands each one to the first
/// unresolved role it satisfies, in the order graphics, present, compute,
/// transfer. A family that took a role is not considered for a later role in
/// that pass. Roles still unresolved afterwards reuse the first family that
/// supports them, so a GPU exposing a single universal family resolves every
/// role to it.
///
/// # Errors
///
/// Returns [`RhiError::MissingQueueFamily`] naming the first role no family supports.
pub fn assign_queue_families(families: &[QueueFamilyCandidate]) -> RhiResult<QueueFamilyIndices> {
    let supports_graphics = |f: &QueueFamilyCandidate| f.flags.contains(vk::QueueFlags::GRAPHICS);
    let supports_present = |f: &QueueFamilyCandidate| f.present_supported;
    let supports_compute = |f: &QueueFamilyCandidate| f.flags.contains(vk::QueueFlags::COMPUTE);
    let supports_transfer = |f: &QueueFamilyCandidate| f.flags.contains(vk::QueueFlags::TRANSFER);

    let mut graphics = None;
    let mut present = None;
    let mut compute = None;
    let mut transfer = None;

    for (index, family) in families.iter().enumerate() {
        if !family.usable() {
            continue;
        }
        let index = index as u32;

        if graphics.is_none() && supports_graphics(family) {
            graphics = Some(index);
            continue;
        }
        if present.is_none() && supports_present(family) {
            present = Some(index);
            continue;
        }
        if compute.is_none() && supports_compute(family) {
            compute = Some(index);
            continue;
        }
        if transfer.is_none() && supports_transfer(family) {
            transfer = Some(index);
            continue;
        }
        if graphics.is_some() && present.is_some() && compute.is_some() && transfer.is_some() {
            break;
        }
    }

    let first_supporting = |pred: &dyn Fn(&QueueFamilyCandidate) -> bool| {
        families
            .iter()
            .position(|f| f.usable() && pred(f))
            .map(|i| i as u32)
    };

    let graphics = graphics
        .or_else(|| first_supporting(&supports_graphics))
        .ok_or(RhiError::MissingQueueFamily("graphics"))?;
    let present = present
        .or_else(|| first_supporting(&supports_present))
        .ok_or(RhiError::MissingQueueFamily("present"))?;
    let compute = compute
        .or_else(|| first_supporting(&supports_compute))
        .ok_or(RhiError::MissingQueueFamily("compute"))?;
    let transfer = transfer
        .or_else(|| first_supporting(&supports_transfer))
        .ok_or(RhiError::MissingQueueFamily("transfer"))?;

    Ok(QueueFamilyIndices {
        graphics,
        present,
        compute,
        transfer,
    })
}

/// Picks the first candidate depth format usable as an optimal-tiling attachment.
pub fn choose_depth_format(
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES.into_iter().find(|&format| {
        format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    /// Surface capabilities as of selection; refreshed on every swapchain build.
    pub swapchain_support: SwapchainSupportDetails,
    pub depth_format: vk::Format,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .field("depth_format", &self.depth_format)
            .finish()
    }
}

/// Selects the GPU to render with.
///
/// The first enumerated device is used; there is no scoring.
///
/// # Errors
///
/// - [`RhiError::NoPhysicalDevice`] if the instance reports no GPU
/// - [`RhiError::MissingQueueFamily`] if a queue role cannot be resolved
/// - [`RhiError::NoDepthFormat`] if no depth attachment format is supported
/// - [`RhiError::Vulkan`] if a surface query fails
pub fn select_physical_device(
    instance: &Instance,
    surface: &Surface,
) -> RhiResult<PhysicalDeviceInfo> {
    let instance = instance.handle();
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let device = *devices.first().ok_or(RhiError::NoPhysicalDevice)?;

    info!("Found {} GPU(s), using the first", devices.len());

    let family_properties = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut candidates = Vec::with_capacity(family_properties.len());
    for (index, family) in family_properties.iter().enumerate() {
        let present_supported = unsafe {
            surface.loader().get_physical_device_surface_support(
                device,
                index as u32,
                surface.handle(),
            )?
        };
        debug!(
            "Queue family {}: {:?} x{}, present={}",
            index, family.queue_flags, family.queue_count, present_supported
        );
        candidates.push(QueueFamilyCandidate {
            flags: family.queue_flags,
            queue_count: family.queue_count,
            present_supported,
        });
    }

    let queue_families = assign_queue_families(&candidates)?;

    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let swapchain_support =
        SwapchainSupportDetails::query(device, surface.handle(), surface.loader())?;

    let depth_format = choose_depth_format(|format| unsafe {
        instance.get_physical_device_format_properties(device, format)
    })
    .ok_or(RhiError::NoDepthFormat)?;

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        swapchain_support,
        depth_format,
    };

    let (major, minor, patch) = info.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, queues {:?}, depth {:?}",
        info.device_name(),
        info.device_type_name(),
        major,
        minor,
        patch,
        info.queue_families,
        info.depth_format
    );

    Ok(info)
}
