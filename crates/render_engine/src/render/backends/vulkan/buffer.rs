//! Buffer management for vertex data and uniforms
//!
//! Memory management following RAII patterns with explicit map/flush control
//! for host-visible memory.

use ash::{vk, Device, Instance};
use std::ffi::c_void;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Resolve a (size, offset) pair against a buffer of `buffer_size` bytes.
///
/// `vk::WHOLE_SIZE` means "from offset to the end". Returns the concrete
/// byte count, or an error when the range falls outside the buffer.
pub fn resolve_range(
    buffer_size: vk::DeviceSize,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
) -> VulkanResult<vk::DeviceSize> {
    if offset > buffer_size {
        return Err(VulkanError::InvalidOperation {
            reason: format!("offset {} exceeds buffer size {}", offset, buffer_size),
        });
    }
    let resolved = if size == vk::WHOLE_SIZE {
        buffer_size - offset
    } else {
        size
    };
    if offset + resolved > buffer_size {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "range {}..{} exceeds buffer size {}",
                offset,
                offset + resolved,
                buffer_size
            ),
        });
    }
    Ok(resolved)
}

/// Buffer wrapper owning the handle and its backing memory
///
/// Creation allocates and binds in one step; allocation failure is reported
/// as `OutOfHostMemory`/`OutOfDeviceMemory` and never retried here. `destroy`
/// is idempotent, and `Drop` routes through it.
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
    descriptor: vk::DescriptorBufferInfo,
    mapped: Option<*mut c_void>,
    destroyed: bool,
}

impl Buffer {
    /// Create a new buffer, allocate backing memory, and bind it
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(|e| VulkanError::resource("buffer", e))?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::from(e));
            }
        };

        unsafe {
            if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
                return Err(VulkanError::from(e));
            }
        }

        let descriptor = vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: size,
        };

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            alignment: mem_requirements.alignment,
            usage,
            memory_properties: properties,
            descriptor,
            mapped: None,
            destroyed: false,
        })
    }

    /// Map a range for host access
    ///
    /// Fails if the buffer is already mapped or the range is out of bounds.
    /// The pointer stays valid until [`Buffer::unmap`].
    pub fn map(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<*mut c_void> {
        if self.mapped.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer is already mapped".to_string(),
            });
        }
        resolve_range(self.size, size, offset)?;

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::from)?
        };
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Unmap the buffer; no-op when not mapped
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe {
                self.device.unmap_memory(self.memory);
            }
        }
    }

    /// Raw copy of `data` into the active mapping
    ///
    /// Requires a prior [`Buffer::map`]; the caller guarantees the mapped
    /// range holds at least `data.len()` bytes.
    pub fn copy_to(&self, data: &[u8]) -> VulkanResult<()> {
        let ptr = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "copy_to requires a mapped buffer".to_string(),
        })?;
        if data.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} bytes do not fit buffer of {}", data.len(), self.size),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        }
        Ok(())
    }

    /// Make host writes visible to the device
    ///
    /// No-op for host-coherent memory; otherwise issues a range flush.
    /// Callers must flush after every write the GPU is about to read.
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> VulkanResult<()> {
        if self
            .memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }

        let range = vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build();

        unsafe {
            self.device
                .flush_mapped_memory_ranges(&[range])
                .map_err(VulkanError::from)
        }
    }

    /// Fill the descriptor view used when this buffer is bound in a set
    pub fn setup_descriptor(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) {
        self.descriptor = vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        };
    }

    /// Map, copy, flush, unmap in one step
    pub fn write_data(&mut self, data: &[u8]) -> VulkanResult<()> {
        self.map(vk::WHOLE_SIZE, 0)?;
        let result = self
            .copy_to(data)
            .and_then(|_| self.flush(vk::WHOLE_SIZE, 0));
        self.unmap();
        result
    }

    /// Release memory and handle; safe to call more than once
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.unmap();
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
        self.destroyed = true;
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get buffer size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Required alignment reported for the allocation
    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Currently mapped pointer, if any
    pub fn mapped(&self) -> Option<*mut c_void> {
        self.mapped
    }

    /// Descriptor view (offset + range) for descriptor-set binding
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        self.descriptor
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A sub-range of a shared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion {
    /// Byte offset into the shared buffer
    pub offset: vk::DeviceSize,
    /// Element count (vertices or indices)
    pub count: u32,
}

/// One large vertex buffer and one large index buffer shared by all render
/// objects, handed out as bump-allocated regions.
///
/// Capacity is fixed at creation; exhaustion is an error rather than a
/// reallocation, since live command buffers reference the handles.
pub struct GeometryBuffer {
    vertex: Buffer,
    index: Buffer,
    vertex_used: vk::DeviceSize,
    index_used: vk::DeviceSize,
}

impl GeometryBuffer {
    /// Create the shared vertex/index buffers with the given byte capacities
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        vertex_capacity: vk::DeviceSize,
        index_capacity: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        let vertex = Buffer::new(
            device.clone(),
            instance,
            physical_device,
            vertex_capacity,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let index = Buffer::new(
            device,
            instance,
            physical_device,
            index_capacity,
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        log::debug!(
            "GeometryBuffer created: {} B vertex, {} B index",
            vertex_capacity,
            index_capacity
        );

        Ok(Self {
            vertex,
            index,
            vertex_used: 0,
            index_used: 0,
        })
    }

    /// Upload packed vertex data, returning its region in the shared buffer
    pub fn upload_vertices(&mut self, data: &[u8], vertex_count: u32) -> VulkanResult<BufferRegion> {
        let offset = self.vertex_used;
        let len = data.len() as vk::DeviceSize;
        if len == 0 {
            return Ok(BufferRegion {
                offset,
                count: vertex_count,
            });
        }
        if offset + len > self.vertex.size() {
            return Err(VulkanError::OutOfDeviceMemory);
        }

        self.vertex.map(len, offset)?;
        let result = self.vertex.copy_to(data);
        self.vertex.unmap();
        result?;

        self.vertex_used += len;
        Ok(BufferRegion {
            offset,
            count: vertex_count,
        })
    }

    /// Upload indices, returning their region in the shared index buffer
    pub fn upload_indices(&mut self, indices: &[u32]) -> VulkanResult<BufferRegion> {
        let offset = self.index_used;
        let len = std::mem::size_of_val(indices) as vk::DeviceSize;
        if len == 0 {
            return Ok(BufferRegion { offset, count: 0 });
        }
        if offset + len > self.index.size() {
            return Err(VulkanError::OutOfDeviceMemory);
        }

        let bytes = unsafe {
            std::slice::from_raw_parts(indices.as_ptr().cast::<u8>(), indices.len() * 4)
        };
        self.index.map(len, offset)?;
        let result = self.index.copy_to(bytes);
        self.index.unmap();
        result?;

        self.index_used += len;
        Ok(BufferRegion {
            offset,
            count: indices.len() as u32,
        })
    }

    /// Shared vertex buffer handle
    pub fn vertex_handle(&self) -> vk::Buffer {
        self.vertex.handle()
    }

    /// Shared index buffer handle
    pub fn index_handle(&self) -> vk::Buffer {
        self.index.handle()
    }
}

/// Find a memory type matching the filter and property flags
pub fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };

    for i in 0..mem_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && mem_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_size_resolves_to_end() {
        assert_eq!(resolve_range(1024, vk::WHOLE_SIZE, 0).unwrap(), 1024);
        assert_eq!(resolve_range(1024, vk::WHOLE_SIZE, 256).unwrap(), 768);
    }

    #[test]
    fn explicit_range_within_bounds() {
        assert_eq!(resolve_range(1024, 512, 256).unwrap(), 512);
        assert_eq!(resolve_range(1024, 1024, 0).unwrap(), 1024);
    }

    #[test]
    fn out_of_bounds_ranges_rejected() {
        assert!(resolve_range(1024, 1, 1024).is_err());
        assert!(resolve_range(1024, 1025, 0).is_err());
        assert!(resolve_range(1024, vk::WHOLE_SIZE, 2048).is_err());
        assert!(resolve_range(1024, 512, 768).is_err());
    }

    #[test]
    fn zero_sized_tail_range_is_valid() {
        assert_eq!(resolve_range(1024, vk::WHOLE_SIZE, 1024).unwrap(), 0);
    }
}
