//! GPU buffer management.
//!
//! This module handles vertex, index, uniform, and staging buffers.
//! It uses gpu-allocator for memory management and provides safe abstractions
//! for buffer creation and data transfer.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used and where its memory lives
//! - [`Buffer`] wraps VkBuffer with gpu-allocator managed memory
//! - [`BufferMapping`] is a checked window into a host-visible buffer
//!
//! Device-local buffers are filled through a staging buffer and a single-use
//! command buffer ([`Buffer::upload_staged`]). Growing a buffer creates a new
//! one, copies the old contents across and swaps them ([`Buffer::resize`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::buffer::{Buffer, BufferUsage};
//! use framepace_rhi::command::CommandPool;
//! use framepace_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), framepace_rhi::RhiError> {
//! let indices: [u32; 6] = [0, 1, 2, 2, 3, 0];
//! let index_buffer = Buffer::upload_staged(
//!     device.clone(),
//!     pool,
//!     device.graphics_queue(),
//!     BufferUsage::Index,
//!     bytemuck::cast_slice(&indices),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which affects
/// Vulkan usage flags and memory allocation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer, device-local
    Vertex,
    /// Index buffer, device-local
    Index,
    /// Uniform buffer, host-visible for per-frame writes
    Uniform,
    /// Staging buffer, host-visible source for uploads
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    ///
    /// Everything but staging can be both a copy source and destination so
    /// [`Buffer::resize`] can move contents across.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | transfer,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Checks that `[offset, offset + len)` lies within a buffer of `size` bytes.
pub fn check_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: vk::DeviceSize) -> RhiResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::Buffer(format!(
            "range {}+{} exceeds buffer size {}",
            offset, len, size
        ))),
    }
}

/// Mutable view of a mapped buffer range, borrowed from its [`Buffer`].
///
/// gpu-allocator keeps host-visible memory persistently mapped, so dropping
/// the mapping only releases the borrow.
pub struct BufferMapping<'a> {
    bytes: &'a mut [u8],
}

impl Deref for BufferMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl DerefMut for BufferMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

/// GPU buffer wrapper with managed memory.
///
/// This struct wraps a Vulkan buffer and its associated memory allocation.
/// Memory is managed by gpu-allocator, which handles suballocation and
/// memory type selection.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
    bound: bool,
}

impl Buffer {
    /// Creates a new buffer and allocates its memory.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - The intended buffer usage
    /// * `size` - Buffer size in bytes
    /// * `bind_on_create` - Bind the allocation immediately; otherwise call [`Buffer::bind`]
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or buffer or memory allocation fails.
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
        bind_on_create: bool,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::Buffer(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let mut this = Self {
            device,
            buffer,
            allocation: None,
            size,
            usage,
            bound: false,
        };

        let requirements = unsafe { this.device.handle().get_buffer_memory_requirements(buffer) };
        let allocation = this.device.allocator().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        this.allocation = Some(allocation);

        if bind_on_create {
            this.bind(0)?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(this)
    }

    /// Binds the buffer's allocation, `offset` bytes into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is already bound or binding fails.
    pub fn bind(&mut self, offset: vk::DeviceSize) -> RhiResult<()> {
        if self.bound {
            return Err(RhiError::Buffer(format!(
                "{} buffer is already bound",
                self.usage.name()
            )));
        }

        let allocation = self.allocation()?;
        unsafe {
            self.device.handle().bind_buffer_memory(
                self.buffer,
                allocation.memory(),
                allocation.offset() + offset,
            )?;
        }

        self.bound = true;
        Ok(())
    }

    /// Maps `size` bytes starting at `offset` for host access.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds or the memory is not
    /// host-visible.
    pub fn lock(
        &mut self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<BufferMapping<'_>> {
        check_range(self.size, offset, size)?;

        let usage = self.usage;
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| RhiError::Buffer("Buffer allocation is not available".to_string()))?;
        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            RhiError::Buffer(format!("{} buffer memory is not mapped", usage.name()))
        })?;

        let start = offset as usize;
        let end = start + size as usize;
        Ok(BufferMapping {
            bytes: &mut mapped[start..end],
        })
    }

    /// Writes `data` to the buffer at `offset`.
    ///
    /// The buffer must use host-visible memory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The buffer memory is not mapped
    /// - The write would exceed the buffer size
    pub fn load(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        check_range(self.size, offset, data.len() as vk::DeviceSize)?;

        let mapped_ptr = self
            .allocation()?
            .mapped_ptr()
            .ok_or_else(|| RhiError::Buffer("Buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Copies `size` bytes into `dst` on the GPU and waits for completion.
    ///
    /// Waits for `queue` to go idle first so the source is not still in use,
    /// then records the copy in a single-use command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if either range is out of bounds or the submission fails.
    pub fn copy_to(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        dst: &Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<()> {
        check_range(self.size, src_offset, size)?;
        check_range(dst.size, dst_offset, size)?;

        self.device.queue_wait_idle(queue)?;

        let cmd = CommandBuffer::begin_single_use(self.device.clone(), pool)?;
        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        cmd.copy_buffer(self.buffer, dst.buffer, &[region]);
        cmd.end_single_use(queue)
    }

    /// Grows the buffer to `new_size`, keeping its contents.
    ///
    /// A new buffer is created and the old contents copied across before the
    /// two are swapped; the old buffer is destroyed once the device is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is smaller than the current size, or if
    /// creation or the copy fails (the buffer is unchanged in that case).
    pub fn resize(
        &mut self,
        new_size: vk::DeviceSize,
        pool: &CommandPool,
        queue: vk::Queue,
    ) -> RhiResult<()> {
        if new_size < self.size {
            return Err(RhiError::Buffer(format!(
                "cannot shrink {} buffer from {} to {} bytes",
                self.usage.name(),
                self.size,
                new_size
            )));
        }
        if new_size == self.size {
            return Ok(());
        }

        let mut replacement = Buffer::new(self.device.clone(), self.usage, new_size, true)?;
        self.copy_to(pool, queue, &replacement, 0, 0, self.size)?;

        self.device.wait_idle()?;
        std::mem::swap(self, &mut replacement);

        debug!(
            "Resized {} buffer: {} -> {} bytes",
            self.usage.name(),
            replacement.size,
            self.size
        );

        Ok(())
    }

    /// Creates a buffer of `usage` holding `data`, uploaded through a staging buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if either buffer cannot be created or the copy fails.
    pub fn upload_staged(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let size = data.len() as vk::DeviceSize;

        let staging = Buffer::new(device.clone(), BufferUsage::Staging, size, true)?;
        staging.load(0, data)?;

        let buffer = Buffer::new(device, usage, size, true)?;
        staging.copy_to(pool, queue, &buffer, 0, 0, size)?;

        Ok(buffer)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    fn allocation(&self) -> RhiResult<&Allocation> {
        self.allocation
            .as_ref()
            .ok_or_else(|| RhiError::Buffer("Buffer allocation is not available".to_string()))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                error!("Failed to free buffer allocation: {:?}", e);
            }
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(BufferUsage::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Index.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(BufferUsage::Staging.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(64, 0, 64).is_ok());
        assert!(check_range(64, 32, 32).is_ok());
        assert!(check_range(64, 64, 0).is_ok());
        assert!(matches!(check_range(64, 32, 33), Err(RhiError::Buffer(_))));
        assert!(matches!(check_range(64, 65, 0), Err(RhiError::Buffer(_))));
        assert!(matches!(
            check_range(64, u64::MAX, 2),
            Err(RhiError::Buffer(_))
        ));
    }
}
