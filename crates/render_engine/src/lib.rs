//! # render_engine
//!
//! A Vulkan rendering backend core: GPU resource lifecycle management and
//! the per-frame rendering pipeline.
//!
//! The crate turns a flat set of render objects (geometry region, material,
//! transform, visibility) into correctly synchronized GPU commands each
//! frame. It covers device and swapchain setup, buffer and image ownership,
//! per-object pipeline and descriptor-set construction, dynamic-offset
//! uniform instancing, command buffer recording with dirty tracking, and the
//! acquire/submit/present frame driver.
//!
//! Out of scope by design: scene graphs, asset file I/O, windowing (consumed
//! through the narrow [`render::RenderWindow`] trait), and UI layers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use render_engine::prelude::*;
//!
//! # fn run(window: &mut dyn RenderWindow, vert: &[u8], frag: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = RendererConfig::new("demo").with_vsync(true);
//! let mut renderer = VulkanRenderer::new(window, config)?;
//! renderer.initialize()?;
//!
//! let shader = renderer.create_shader(&ShaderCreateInfo {
//!     vertex_spirv: vert,
//!     fragment_spirv: frag,
//!     attributes: VertexAttributes::POSITION | VertexAttributes::COLOR,
//! })?;
//! let material = renderer.create_material(&MaterialCreateInfo {
//!     shader,
//!     textures: MaterialTextures::default(),
//! })?;
//! # let (vertex_bytes, vertex_count) = (vec![0u8; 0], 0);
//! let object = renderer.initialize_render_object(&RenderObjectCreateInfo {
//!     material,
//!     vertex_data: &vertex_bytes,
//!     vertex_count,
//!     indices: None,
//!     topology: Topology::TriangleList,
//!     cull_mode: CullMode::Back,
//!     transform: nalgebra::Matrix4::identity(),
//!     visible: true,
//! })?;
//! renderer.post_initialize_render_object(object)?;
//! renderer.post_initialize()?;
//!
//! loop {
//!     renderer.draw()?;
//!     renderer.swap_buffers()?;
//! }
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod render;

pub use config::RendererConfig;
pub use render::{GraphicsBackend, RenderError, VulkanRenderer};

/// Common imports for engine users
pub mod prelude {
    pub use crate::config::RendererConfig;
    pub use crate::render::api::{
        CullMode, GraphicsBackend, MaterialCreateInfo, MaterialId, MaterialTextures,
        RenderError, RenderId, RenderObjectCreateInfo, ShaderCreateInfo, ShaderId,
        TextureCreateInfo, TextureFormat, TextureId, TextureSlot, Topology, VertexAttributes,
    };
    pub use crate::render::backends::vulkan::VulkanRenderer;
    pub use crate::render::window::{RenderWindow, WindowError};
}
