//! Render object, material and shader storage
//!
//! Arena-style tables indexed by typed IDs; no object holds a pointer to
//! another, only IDs resolved through the tables. Teardown walks the tables
//! in dependency order (objects, then materials, then shaders/textures).

use ash::vk;
use nalgebra::Matrix4;

use crate::render::api::{CullMode, MaterialId, MaterialTextures, ShaderId, Topology};
use crate::render::api::VertexAttributes;
use crate::render::backends::vulkan::buffer::BufferRegion;
use crate::render::backends::vulkan::pipeline::{GraphicsPipeline, ShaderModule};

/// Map API topology onto the Vulkan primitive topology
pub fn topology_to_vk(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        Topology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
    }
}

/// Map API cull mode onto Vulkan cull flags
pub fn cull_mode_to_vk(cull_mode: CullMode) -> vk::CullModeFlags {
    match cull_mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// A compiled shader pair and the vertex attributes it consumes
pub struct Shader {
    /// Vertex stage module
    pub vertex: ShaderModule,
    /// Fragment stage module
    pub fragment: ShaderModule,
    /// Attribute mask driving vertex input state
    pub attributes: VertexAttributes,
}

/// A material: shader reference, sparse texture slots, and the index of the
/// descriptor-set layout shared by materials with the same slot shape
pub struct Material {
    /// Shader the material renders with
    pub shader: ShaderId,
    /// Sparse texture assignment
    pub textures: MaterialTextures,
    /// Index into the renderer's layout table
    pub descriptor_set_layout_index: usize,
}

/// Per-object GPU state
///
/// The pipeline and descriptor set are owned here and die with the object;
/// geometry lives in the shared buffers and is referenced by region.
pub struct RenderObject {
    /// Material reference
    pub material: MaterialId,
    /// Region in the shared vertex buffer
    pub vertex_region: BufferRegion,
    /// Region in the shared index buffer; `None` draws non-indexed
    pub index_region: Option<BufferRegion>,
    /// Primitive topology
    pub topology: Topology,
    /// Face culling mode
    pub cull_mode: CullMode,
    /// Owned graphics pipeline; built in post-initialize
    pub pipeline: Option<GraphicsPipeline>,
    /// Owned descriptor set; allocated in post-initialize
    pub descriptor_set: Option<vk::DescriptorSet>,
    /// Slot in the dynamic uniform buffer
    pub dynamic_index: u32,
    /// Whether the object is drawn
    pub visible: bool,
    /// Current world transform
    pub transform: Matrix4<f32>,
}

impl RenderObject {
    /// Whether this object can be recorded into a command buffer
    pub fn is_drawable(&self) -> bool {
        self.visible && self.pipeline.is_some() && self.descriptor_set.is_some()
    }
}
