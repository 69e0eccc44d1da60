//! Framebuffer management
//!
//! Swapchain-facing framebuffers, depth buffers, and offscreen targets
//! (single-attachment capture and the deferred G-buffer).

use ash::{vk, Device, Instance};

use crate::render::backends::vulkan::render_pass::{RenderPass, DEPTH_FORMAT};
use crate::render::backends::vulkan::texture::{
    create_image, create_image_view, ImageUsage, Texture,
};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a new framebuffer over the given attachments
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&framebuffer_create_info, None)
                .map_err(|e| VulkanError::resource("framebuffer", e))?
        };

        Ok(Self {
            device,
            framebuffer,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Depth buffer wrapper with RAII cleanup
pub struct DepthBuffer {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    image_view: vk::ImageView,
}

impl DepthBuffer {
    /// Create a new depth buffer sized to the given extent
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let (image, memory) = create_image(
            &device,
            instance,
            physical_device,
            extent.width,
            extent.height,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let image_view = match create_image_view(
            &device,
            image,
            DEPTH_FORMAT,
            vk::ImageAspectFlags::DEPTH,
        ) {
            Ok(view) => view,
            Err(e) => {
                unsafe {
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
            image_view,
        })
    }

    /// Get the image view handle
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.image_view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Standard G-buffer layout: (name, format) per color attachment
pub const GBUFFER_ATTACHMENTS: [(&str, vk::Format); 3] = [
    ("position", vk::Format::R16G16B16A16_SFLOAT),
    ("normal", vk::Format::R16G16B16A16_SFLOAT),
    ("albedo", vk::Format::R8G8B8A8_UNORM),
];

/// Offscreen render target: its own render pass, named color attachments,
/// a depth buffer, and the framebuffer tying them together.
///
/// Field order is destruction order: the framebuffer goes before the views
/// and images it references, the render pass last.
pub struct OffscreenTarget {
    framebuffer: Framebuffer,
    attachments: Vec<(&'static str, Texture)>,
    depth: DepthBuffer,
    render_pass: RenderPass,
    extent: vk::Extent2D,
}

impl OffscreenTarget {
    /// Create a multi-attachment G-buffer target for deferred shading
    pub fn gbuffer(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        Self::with_attachments(device, instance, physical_device, extent, &GBUFFER_ATTACHMENTS)
    }

    /// Create a single-attachment offscreen capture target
    pub fn capture(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        Self::with_attachments(
            device,
            instance,
            physical_device,
            extent,
            &[("color", format)],
        )
    }

    fn with_attachments(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
        specs: &[(&'static str, vk::Format)],
    ) -> VulkanResult<Self> {
        let formats: Vec<vk::Format> = specs.iter().map(|(_, format)| *format).collect();
        let render_pass = RenderPass::new_offscreen_pass(device.clone(), &formats)?;

        let mut attachments = Vec::with_capacity(specs.len());
        for &(name, format) in specs {
            let texture = Texture::new(
                device.clone(),
                instance,
                physical_device,
                extent.width,
                extent.height,
                format,
                ImageUsage::ColorAttachment,
            )?;
            attachments.push((name, texture));
        }

        let depth = DepthBuffer::new(device.clone(), instance, physical_device, extent)?;

        let mut views: Vec<vk::ImageView> =
            attachments.iter().map(|(_, tex)| tex.view()).collect();
        views.push(depth.image_view());

        let framebuffer = Framebuffer::new(device, render_pass.handle(), &views, extent)?;

        log::debug!(
            "Offscreen target created: {} color attachment(s), {}x{}",
            attachments.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            framebuffer,
            attachments,
            depth,
            render_pass,
            extent,
        })
    }

    /// The target's render pass
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// The framebuffer handle
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer.handle()
    }

    /// Target extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of color attachments
    pub fn color_attachment_count(&self) -> u32 {
        self.attachments.len() as u32
    }

    /// Look up a named color attachment
    pub fn attachment(&self, name: &str) -> Option<&Texture> {
        self.attachments
            .iter()
            .find(|(attachment_name, _)| *attachment_name == name)
            .map(|(_, texture)| texture)
    }

    /// Depth attachment view
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.image_view()
    }
}
