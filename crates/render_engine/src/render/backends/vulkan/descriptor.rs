//! Descriptor set and resource binding management
//!
//! Layouts are built per material *shape*: binding 0 is the constant
//! uniform buffer, binding 1 the dynamic per-object buffer, and each texture
//! slot a material declares gets a combined image sampler at the slot's
//! fixed binding. Materials sharing a slot set share a layout (grouped by
//! `descriptor_set_layout_index`); a set's writes cover exactly the declared
//! slots and nothing else — writing an undeclared binding is a validation
//! error, which is why planning and layout selection use the same slot list.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(mut self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a dynamic uniform buffer binding (per-draw offset)
    pub fn add_dynamic_uniform_buffer(
        mut self,
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(
        mut self,
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Bindings added so far, in insertion order
    pub fn planned_bindings(&self) -> Vec<(u32, vk::DescriptorType)> {
        self.bindings
            .iter()
            .map(|b| (b.binding, b.descriptor_type))
            .collect()
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| VulkanError::resource("descriptor set layout", e))?
        };

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor set layout wrapper with automatic cleanup
///
/// Sets allocated against this layout are freed with their pool; the layout
/// itself must outlive them, which the renderer's field order guarantees.
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Number of bindings in this layout
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a pool sized for `max_sets` material descriptor sets
    pub fn new(device: Device, max_sets: u32) -> VulkanResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(max_sets)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .descriptor_count(max_sets)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_sets * 10) // up to ten texture slots per set
                .build(),
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(|e| VulkanError::resource("descriptor pool", e))?
        };

        Ok(Self { pool, device })
    }

    /// Allocate descriptor sets for the given layouts
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| VulkanError::resource("descriptor set", e))
        }
    }

    /// Return a set to the pool
    pub fn free(&self, set: vk::DescriptorSet) -> VulkanResult<()> {
        unsafe {
            self.device
                .free_descriptor_sets(self.pool, &[set])
                .map_err(VulkanError::from)
        }
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Fully-resolved inputs for one material descriptor set
pub struct DescriptorSetCreateInfo<'a> {
    /// Layout matching exactly the bindings below
    pub layout: vk::DescriptorSetLayout,
    /// Constant uniform buffer view (binding 0)
    pub constant_buffer: vk::DescriptorBufferInfo,
    /// Dynamic uniform buffer view with range = stride (binding 1)
    pub dynamic_buffer: vk::DescriptorBufferInfo,
    /// Present texture slots: (binding, view, sampler), absent slots omitted
    pub textures: &'a [(u32, vk::ImageView, vk::Sampler)],
}

/// The bindings a set built from this info will write, in order.
///
/// Must agree with the layout the material's slot set selected; used by
/// tests and kept separate from the write path for that reason.
pub fn planned_writes(info: &DescriptorSetCreateInfo<'_>) -> Vec<(u32, vk::DescriptorType)> {
    let mut writes = vec![
        (0, vk::DescriptorType::UNIFORM_BUFFER),
        (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
    ];
    for (binding, _, _) in info.textures {
        writes.push((*binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }
    writes
}

/// Allocate a descriptor set and write every declared binding
pub fn allocate_and_write(
    device: &Device,
    pool: &DescriptorPool,
    info: &DescriptorSetCreateInfo<'_>,
) -> VulkanResult<vk::DescriptorSet> {
    let set = pool.allocate(&[info.layout])?[0];

    let buffer_infos = [info.constant_buffer, info.dynamic_buffer];
    let image_infos: Vec<vk::DescriptorImageInfo> = info
        .textures
        .iter()
        .map(|&(_, view, sampler)| {
            vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(view)
                .sampler(sampler)
                .build()
        })
        .collect();

    let mut writes = vec![
        vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_infos[0]))
            .build(),
        vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(1)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_infos[1]))
            .build(),
    ];

    for (i, &(binding, _, _)) in info.textures.iter().enumerate() {
        writes.push(
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&image_infos[i]))
                .build(),
        );
    }

    unsafe {
        device.update_descriptor_sets(&writes, &[]);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_info(textures: &[(u32, vk::ImageView, vk::Sampler)]) -> DescriptorSetCreateInfo<'_> {
        DescriptorSetCreateInfo {
            layout: vk::DescriptorSetLayout::null(),
            constant_buffer: vk::DescriptorBufferInfo::default(),
            dynamic_buffer: vk::DescriptorBufferInfo::default(),
            textures,
        }
    }

    #[test]
    fn buffers_are_always_written() {
        let info = dummy_info(&[]);
        let writes = planned_writes(&info);
        assert_eq!(
            writes,
            vec![
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
            ]
        );
    }

    #[test]
    fn absent_texture_slots_produce_no_writes() {
        // Two present slots out of the full sparse set
        let textures = [
            (2, vk::ImageView::null(), vk::Sampler::null()),
            (5, vk::ImageView::null(), vk::Sampler::null()),
        ];
        let info = dummy_info(&textures);
        let writes = planned_writes(&info);
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[2], (2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
        assert_eq!(writes[3], (5, vk::DescriptorType::COMBINED_IMAGE_SAMPLER));
    }

    #[test]
    fn layout_builder_plans_match_insertion_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_dynamic_uniform_buffer(1, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            builder.planned_bindings(),
            vec![
                (0, vk::DescriptorType::UNIFORM_BUFFER),
                (1, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
                (2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            ]
        );
    }
}
