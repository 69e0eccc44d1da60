//! Vulkan rendering backend
//!
//! Low-level wrappers (context, buffers, images, sync, commands) and the
//! renderer that composes them into the per-frame pipeline.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod framebuffer;
pub mod objects;
pub mod pipeline;
pub mod recorder;
pub mod render_pass;
pub mod renderer;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod uniform;
pub mod vertex_layout;

// Re-export commonly used types
pub use buffer::{Buffer, BufferRegion, GeometryBuffer};
pub use commands::{CommandPool, CommandRecorder};
pub use context::{
    LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult,
};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use framebuffer::{DepthBuffer, Framebuffer, OffscreenTarget};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineCreateInfo, ShaderModule};
pub use recorder::CommandBufferRecorder;
pub use render_pass::RenderPass;
pub use renderer::VulkanRenderer;
pub use swapchain::{plan_swapchain, SurfaceParams, Swapchain, SwapchainPlan, SwapchainState};
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::{ImageUsage, Texture};
pub use uniform::{align_up, DynamicUniformBuffer, SceneUniformData, UniformBufferPair};
