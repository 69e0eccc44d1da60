//! Uniform buffer management
//!
//! One constant buffer carries per-frame data, one dynamic buffer carries
//! per-object data at device-aligned strides indexed by dynamic offset. The
//! dynamic buffer keeps a host-side shadow so per-object updates are cheap
//! and the device copy happens once per frame.

use ash::{vk, Device, Instance};
use nalgebra::Matrix4;

use crate::render::backends::vulkan::buffer::Buffer;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Round `size` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two (Vulkan guarantees this for
/// `minUniformBufferOffsetAlignment`); zero means no alignment requirement.
pub fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        return size;
    }
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Write `data` into `shadow` at slot `index` of the given stride.
///
/// Pure staging step shared by the dynamic buffer; bytes between strides and
/// in other slots are left untouched.
pub fn write_at_stride(shadow: &mut [u8], stride: usize, index: usize, data: &[u8]) {
    debug_assert!(data.len() <= stride);
    let start = index * stride;
    shadow[start..start + data.len()].copy_from_slice(data);
}

/// Per-frame data for the constant uniform buffer
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SceneUniformData {
    /// View matrix
    pub view: [[f32; 4]; 4],
    /// Projection matrix
    pub projection: [[f32; 4]; 4],
    /// Premultiplied view-projection matrix
    pub view_projection: [[f32; 4]; 4],
}

unsafe impl bytemuck::Pod for SceneUniformData {}
unsafe impl bytemuck::Zeroable for SceneUniformData {}

impl SceneUniformData {
    /// Build from view and projection matrices
    pub fn new(view: &Matrix4<f32>, projection: &Matrix4<f32>) -> Self {
        let view_projection = projection * view;
        Self {
            view: (*view).into(),
            projection: (*projection).into(),
            view_projection: view_projection.into(),
        }
    }
}

impl Default for SceneUniformData {
    fn default() -> Self {
        let identity = Matrix4::identity();
        Self::new(&identity, &identity)
    }
}

/// Per-object data for the dynamic uniform buffer
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectUniformData {
    /// Model (world transform) matrix
    pub model: [[f32; 4]; 4],
}

unsafe impl bytemuck::Pod for ObjectUniformData {}
unsafe impl bytemuck::Zeroable for ObjectUniformData {}

impl ObjectUniformData {
    /// Build from a model matrix
    pub fn new(model: &Matrix4<f32>) -> Self {
        Self {
            model: (*model).into(),
        }
    }
}

/// Dynamic uniform buffer with one aligned slot per render object
pub struct DynamicUniformBuffer {
    buffer: Buffer,
    stride: vk::DeviceSize,
    capacity: u32,
    shadow: Vec<u8>,
}

impl DynamicUniformBuffer {
    /// Create a dynamic buffer with `capacity` slots of `element_size` bytes,
    /// each rounded up to the device's minimum offset alignment.
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        element_size: vk::DeviceSize,
        min_alignment: vk::DeviceSize,
        capacity: u32,
    ) -> VulkanResult<Self> {
        let stride = align_up(element_size, min_alignment);
        let size = stride * vk::DeviceSize::from(capacity.max(1));

        let mut buffer = Buffer::new(
            device,
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        // Persistently mapped; unmapped by destroy/drop
        buffer.map(vk::WHOLE_SIZE, 0)?;
        buffer.setup_descriptor(stride, 0);

        log::debug!(
            "Dynamic uniform buffer: {} slots, stride {} (element {})",
            capacity,
            stride,
            element_size
        );

        Ok(Self {
            buffer,
            stride,
            capacity: capacity.max(1),
            shadow: vec![0; size as usize],
        })
    }

    /// Stage per-object data at the given slot.
    ///
    /// Fails fast when `index` exceeds the allocated instance count; the
    /// caller must have sized the buffer to the current object count before
    /// the first draw of a frame that added objects.
    pub fn update(&mut self, index: u32, data: &[u8]) -> VulkanResult<()> {
        debug_assert!(index < self.capacity, "dynamic slot out of range");
        if index >= self.capacity {
            return Err(VulkanError::InvalidOperation {
                reason: format!("dynamic slot {} out of range (capacity {})", index, self.capacity),
            });
        }
        if data.len() as vk::DeviceSize > self.stride {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} bytes exceed dynamic stride {}", data.len(), self.stride),
            });
        }
        write_at_stride(&mut self.shadow, self.stride as usize, index as usize, data);
        Ok(())
    }

    /// Copy the staged shadow to the mapped buffer and flush it
    pub fn upload(&mut self) -> VulkanResult<()> {
        self.buffer.copy_to(&self.shadow)?;
        self.buffer.flush(vk::WHOLE_SIZE, 0)
    }

    /// Byte offset of a slot, used as the draw's dynamic offset
    pub fn offset_of(&self, index: u32) -> u32 {
        (vk::DeviceSize::from(index) * self.stride) as u32
    }

    /// Aligned per-slot stride
    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }

    /// Number of allocated slots
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Staged host copy of the buffer contents
    pub fn shadow(&self) -> &[u8] {
        &self.shadow
    }

    /// Descriptor view with range = one stride, for UNIFORM_BUFFER_DYNAMIC
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor()
    }

    /// Replace the backing buffer with one of at least `capacity` slots,
    /// carrying the staged contents over. The caller must guarantee the old
    /// buffer is no longer referenced by in-flight work (device idle).
    pub fn grow(
        &mut self,
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        element_size: vk::DeviceSize,
        min_alignment: vk::DeviceSize,
        capacity: u32,
    ) -> VulkanResult<()> {
        if capacity <= self.capacity {
            return Ok(());
        }
        let mut grown = Self::new(
            device,
            instance,
            physical_device,
            element_size,
            min_alignment,
            capacity,
        )?;
        grown.shadow[..self.shadow.len()].copy_from_slice(&self.shadow);
        *self = grown;
        Ok(())
    }
}

/// Constant (per-frame) + dynamic (per-object) uniform buffer pair
pub struct UniformBufferPair {
    /// Per-frame constant buffer, persistently mapped
    pub constant: Buffer,
    /// Per-object dynamic buffer
    pub dynamic: DynamicUniformBuffer,
}

impl UniformBufferPair {
    /// Create the pair sized for `SceneUniformData` + `capacity` objects
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        min_alignment: vk::DeviceSize,
        capacity: u32,
    ) -> VulkanResult<Self> {
        let constant_size = std::mem::size_of::<SceneUniformData>() as vk::DeviceSize;
        let mut constant = Buffer::new(
            device.clone(),
            instance,
            physical_device,
            constant_size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        constant.map(vk::WHOLE_SIZE, 0)?;
        constant.setup_descriptor(constant_size, 0);

        let dynamic = DynamicUniformBuffer::new(
            device,
            instance,
            physical_device,
            std::mem::size_of::<ObjectUniformData>() as vk::DeviceSize,
            min_alignment,
            capacity,
        )?;

        Ok(Self { constant, dynamic })
    }

    /// Write this frame's scene data into the constant buffer
    pub fn update_constant(&mut self, data: &SceneUniformData) -> VulkanResult<()> {
        self.constant.copy_to(bytemuck::bytes_of(data))?;
        self.constant.flush(vk::WHOLE_SIZE, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_at_least_size_and_aligned() {
        for &alignment in &[16u64, 64, 256] {
            for &size in &[1u64, 4, 63, 64, 65, 128, 200, 256, 1000] {
                let stride = align_up(size, alignment);
                assert!(stride >= size);
                assert_eq!(stride % alignment, 0);
            }
        }
    }

    #[test]
    fn aligned_sizes_are_unchanged() {
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(0, 256), 0);
    }

    #[test]
    fn zero_alignment_means_packed() {
        assert_eq!(align_up(100, 0), 100);
    }

    #[test]
    fn two_objects_get_distinct_offsets() {
        let stride = align_up(
            std::mem::size_of::<ObjectUniformData>() as vk::DeviceSize,
            256,
        ) as usize;
        let mut shadow = vec![0u8; stride * 2];

        let first = vec![0xAAu8; 64];
        let second = vec![0xBBu8; 64];
        write_at_stride(&mut shadow, stride, 0, &first);
        write_at_stride(&mut shadow, stride, 1, &second);

        // First slot sits at offset 0, second at exactly one stride
        assert_eq!(&shadow[..64], &first[..]);
        assert_eq!(&shadow[stride..stride + 64], &second[..]);
    }

    #[test]
    fn updating_one_slot_leaves_the_other_untouched() {
        let stride = 256usize;
        let mut shadow = vec![0u8; stride * 2];

        write_at_stride(&mut shadow, stride, 0, &[0x11u8; 64]);
        write_at_stride(&mut shadow, stride, 1, &[0x22u8; 64]);
        let slot0_before = shadow[..stride].to_vec();

        // Re-update slot 1 with new data
        write_at_stride(&mut shadow, stride, 1, &[0x33u8; 64]);

        assert_eq!(&shadow[..stride], &slot0_before[..]);
        assert_eq!(&shadow[stride..stride + 64], &[0x33u8; 64][..]);
    }

    #[test]
    fn scene_uniform_data_is_pod_sized() {
        // Three column-major mat4s, no padding
        assert_eq!(std::mem::size_of::<SceneUniformData>(), 3 * 64);
        assert_eq!(std::mem::size_of::<ObjectUniformData>(), 64);
    }

    #[test]
    fn view_projection_is_premultiplied() {
        let view = Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0));
        let projection = Matrix4::new_scaling(2.0);
        let data = SceneUniformData::new(&view, &projection);
        let expected: [[f32; 4]; 4] = (projection * view).into();
        for (column, expected_column) in data.view_projection.iter().zip(expected.iter()) {
            for (value, expected_value) in column.iter().zip(expected_column.iter()) {
                approx::assert_relative_eq!(value, expected_value);
            }
        }
    }
}
