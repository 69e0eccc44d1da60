//! Texture and image management
//!
//! Image, view and sampler creation plus the image-layout transition state
//! machine. The access masks for a transition come from a fixed table keyed
//! by old and new layout; the texture's `layout` field is the authoritative
//! record of the last transition issued, updated synchronously on the CPU
//! even though the GPU-side effect is asynchronous. Subsequent transitions
//! rely on that field instead of any GPU readback.

use ash::{vk, Device, Instance};

use crate::render::backends::vulkan::buffer::{find_memory_type, Buffer};
use crate::render::backends::vulkan::commands::CommandPool;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// How an image will be used; sizes usage flags and aspect accordingly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsage {
    /// Sampled in shaders, filled by transfer
    Sampled,
    /// Rendered to as a color attachment, then sampled
    ColorAttachment,
    /// Depth/stencil attachment
    DepthStencilAttachment,
}

impl ImageUsage {
    fn usage_flags(self) -> vk::ImageUsageFlags {
        match self {
            Self::Sampled => {
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
            }
            Self::ColorAttachment => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            Self::DepthStencilAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    fn aspect_flags(self) -> vk::ImageAspectFlags {
        match self {
            Self::DepthStencilAttachment => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Derive (srcAccessMask, dstAccessMask) for a layout transition.
///
/// Source masks wait out writes the old layout may have in flight; the
/// destination mask names the first access in the new layout. Transitions
/// into SHADER_READ_ONLY default the source to host/transfer writes only
/// when no stronger source dependency was already determined.
///
/// A pair outside the table is an error in debug builds; release builds keep
/// the permissive zero mask and log it, since a zero mask may
/// under-synchronize.
pub fn barrier_access_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<(vk::AccessFlags, vk::AccessFlags)> {
    let mut src_access = match old_layout {
        // Undefined contents, nothing to wait for; only valid as initial layout
        vk::ImageLayout::UNDEFINED => vk::AccessFlags::empty(),
        // Preinitialized preserves host-written memory contents
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        other => {
            if cfg!(debug_assertions) {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("no source access mask for old layout {:?}", other),
                });
            }
            log::warn!(
                "unlisted old layout {:?} in transition; using empty source access mask",
                other
            );
            vk::AccessFlags::empty()
        }
    };

    let dst_access = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            src_access |= vk::AccessFlags::TRANSFER_READ;
            vk::AccessFlags::TRANSFER_READ
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            src_access = vk::AccessFlags::TRANSFER_READ;
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            if src_access == vk::AccessFlags::empty() {
                src_access = vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE;
            }
            vk::AccessFlags::SHADER_READ
        }
        other => {
            if cfg!(debug_assertions) {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("no destination access mask for new layout {:?}", other),
                });
            }
            log::warn!(
                "unlisted new layout {:?} in transition; using empty destination access mask",
                other
            );
            vk::AccessFlags::empty()
        }
    };

    Ok((src_access, dst_access))
}

/// Create an image with bound device-local memory
pub fn create_image(
    device: &Device,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    width: u32,
    height: u32,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> VulkanResult<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    let image = unsafe {
        device
            .create_image(&image_info, None)
            .map_err(|e| VulkanError::resource("image", e))?
    };

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type_index = match find_memory_type(
        instance,
        physical_device,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(VulkanError::from(e));
        }
    };

    unsafe {
        if let Err(e) = device.bind_image_memory(image, memory, 0) {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
            return Err(VulkanError::from(e));
        }
    }

    Ok((image, memory))
}

/// Create a 2D image view
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device
            .create_image_view(&create_info, None)
            .map_err(|e| VulkanError::resource("image view", e))
    }
}

/// Texture owning image, memory, view, sampler and the authoritative layout
pub struct Texture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
    width: u32,
    height: u32,
}

impl Texture {
    /// Create an empty texture sized for the given usage; layout starts
    /// UNDEFINED until the first transition.
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: ImageUsage,
    ) -> VulkanResult<Self> {
        let (image, memory) = create_image(
            &device,
            instance,
            physical_device,
            width,
            height,
            format,
            usage.usage_flags(),
        )?;

        let aspect = usage.aspect_flags();
        let view = match create_image_view(&device, image, format, aspect) {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(e);
            }
        };

        let sampler = match Self::create_sampler(&device) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe {
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            sampler,
            format,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            width,
            height,
        })
    }

    /// Create a sampled texture from raw pixel data.
    ///
    /// Stages through a host-visible buffer, transitions to TRANSFER_DST,
    /// copies, then transitions to SHADER_READ_ONLY on the graphics queue.
    pub fn from_pixels(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        queue: vk::Queue,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        let mut texture = Self::new(
            device.clone(),
            instance,
            physical_device,
            width,
            height,
            format,
            ImageUsage::Sampled,
        )?;

        let mut staging = Buffer::new(
            device.clone(),
            instance,
            physical_device,
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_data(pixels)?;

        let mut recorder = command_pool.begin_single_time()?;

        texture.transition_layout(
            recorder.command_buffer(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            texture.full_subresource_range(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )?;

        let copy_region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .build();

        unsafe {
            device.cmd_copy_buffer_to_image(
                recorder.command_buffer(),
                staging.handle(),
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy_region],
            );
        }

        texture.transition_layout(
            recorder.command_buffer(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            texture.full_subresource_range(),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )?;

        command_pool.submit_single_time(recorder, queue)?;

        log::debug!("Uploaded {}x{} texture ({} bytes)", width, height, pixels.len());
        Ok(texture)
    }

    fn create_sampler(device: &Device) -> VulkanResult<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(|e| VulkanError::resource("sampler", e))
        }
    }

    /// Record a layout transition barrier into `command_buffer`.
    ///
    /// Access masks come from the transition table keyed off the current
    /// authoritative layout; the layout field is updated synchronously.
    pub fn transition_layout(
        &mut self,
        command_buffer: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
        subresource_range: vk::ImageSubresourceRange,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> VulkanResult<()> {
        let (src_access, dst_access) = barrier_access_masks(self.layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range)
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        self.layout = new_layout;
        Ok(())
    }

    /// Subresource range covering the whole image
    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Sampler handle
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Authoritative current layout (last transition issued)
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Dimensions in pixels
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn old_layouts() -> [(vk::ImageLayout, vk::AccessFlags); 7] {
        [
            (vk::ImageLayout::UNDEFINED, vk::AccessFlags::empty()),
            (vk::ImageLayout::PREINITIALIZED, vk::AccessFlags::HOST_WRITE),
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            (
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
            ),
        ]
    }

    #[test]
    fn transfer_dst_destination_masks() {
        for (old, src) in old_layouts() {
            let (s, d) =
                barrier_access_masks(old, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
            assert_eq!(s, src, "src mask for {:?}", old);
            assert_eq!(d, vk::AccessFlags::TRANSFER_WRITE);
        }
    }

    #[test]
    fn transfer_src_destination_adds_transfer_read_to_source() {
        for (old, src) in old_layouts() {
            let (s, d) =
                barrier_access_masks(old, vk::ImageLayout::TRANSFER_SRC_OPTIMAL).unwrap();
            assert_eq!(s, src | vk::AccessFlags::TRANSFER_READ, "src mask for {:?}", old);
            assert_eq!(d, vk::AccessFlags::TRANSFER_READ);
        }
    }

    #[test]
    fn color_attachment_destination_masks() {
        for (old, _) in old_layouts() {
            let (s, d) =
                barrier_access_masks(old, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap();
            // Table fixes the source to transfer-read for this destination
            assert_eq!(s, vk::AccessFlags::TRANSFER_READ);
            assert_eq!(d, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        }
    }

    #[test]
    fn depth_attachment_destination_masks() {
        for (old, src) in old_layouts() {
            let (s, d) = barrier_access_masks(
                old,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
            .unwrap();
            assert_eq!(s, src, "src mask for {:?}", old);
            assert_eq!(d, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);
        }
    }

    #[test]
    fn shader_read_destination_defaults_source_only_when_empty() {
        // UNDEFINED has no source access, so the host/transfer default applies
        let (s, d) = barrier_access_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(
            s,
            vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(d, vk::AccessFlags::SHADER_READ);

        // A stronger already-determined dependency must not be masked
        let (s, d) = barrier_access_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(s, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(d, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn mandatory_pairs_are_deterministic() {
        let destinations = [
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ];
        for (old, _) in old_layouts() {
            for new in destinations {
                let first = barrier_access_masks(old, new).unwrap();
                let second = barrier_access_masks(old, new).unwrap();
                assert_eq!(first, second, "({:?} -> {:?})", old, new);
            }
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    fn unlisted_pairs_are_rejected_in_debug() {
        assert!(barrier_access_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        )
        .is_err());
        assert!(barrier_access_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_err());
    }
}
