//! The graphics backend capability interface
//!
//! One trait, implemented by each backend variant, selected at build/config
//! time. There is no shared base-renderer state; the scene owns transforms
//! and pushes them in through `update_transform_matrix`, and the renderer
//! never reaches back into scene objects.

use nalgebra::Matrix4;
use thiserror::Error;

use super::{MaterialId, RenderId, ShaderId, TextureId, VertexAttributes};
use crate::render::backends::vulkan::VulkanError;

/// Errors surfaced through the backend-agnostic API
#[derive(Error, Debug)]
pub enum RenderError {
    /// Backend-level failure
    #[error(transparent)]
    Backend(#[from] VulkanError),

    /// The render object ID does not name a live object
    #[error("unknown render object")]
    UnknownRenderObject,

    /// A resource ID (material, shader, texture) does not resolve
    #[error("unknown {0} id")]
    UnknownResource(&'static str),
}

/// Primitive topology for a render object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Isolated points
    PointList,
    /// Isolated line segments
    LineList,
    /// Connected line strip
    LineStrip,
    /// Isolated triangles
    TriangleList,
    /// Connected triangle strip
    TriangleStrip,
    /// Triangle fan
    TriangleFan,
}

/// Face culling mode for a render object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Pixel format of texture data handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB-encoded
    Rgba8Srgb,
}

/// The fixed set of optional texture slots a material may populate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    /// Diffuse color map
    Diffuse,
    /// Tangent-space normal map
    Normal,
    /// Albedo map (PBR base color)
    Albedo,
    /// Metallic map
    Metallic,
    /// Roughness map
    Roughness,
    /// Ambient occlusion map
    AmbientOcclusion,
    /// Environment cubemap
    Cubemap,
    /// Irradiance cubemap
    Irradiance,
    /// Prefiltered environment map
    Prefilter,
    /// BRDF lookup table
    BrdfLut,
}

impl TextureSlot {
    /// Every slot, in binding order
    pub const ALL: [TextureSlot; 10] = [
        TextureSlot::Diffuse,
        TextureSlot::Normal,
        TextureSlot::Albedo,
        TextureSlot::Metallic,
        TextureSlot::Roughness,
        TextureSlot::AmbientOcclusion,
        TextureSlot::Cubemap,
        TextureSlot::Irradiance,
        TextureSlot::Prefilter,
        TextureSlot::BrdfLut,
    ];

    /// The shader binding index this slot occupies.
    ///
    /// Bindings 0 and 1 are the constant and dynamic uniform buffers.
    pub fn binding(self) -> u32 {
        2 + Self::ALL.iter().position(|&s| s == self).unwrap() as u32
    }
}

/// Sparse texture assignment for a material
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialTextures {
    /// Diffuse color map
    pub diffuse: Option<TextureId>,
    /// Tangent-space normal map
    pub normal: Option<TextureId>,
    /// Albedo map
    pub albedo: Option<TextureId>,
    /// Metallic map
    pub metallic: Option<TextureId>,
    /// Roughness map
    pub roughness: Option<TextureId>,
    /// Ambient occlusion map
    pub ambient_occlusion: Option<TextureId>,
    /// Environment cubemap
    pub cubemap: Option<TextureId>,
    /// Irradiance cubemap
    pub irradiance: Option<TextureId>,
    /// Prefiltered environment map
    pub prefilter: Option<TextureId>,
    /// BRDF lookup table
    pub brdf_lut: Option<TextureId>,
}

impl MaterialTextures {
    /// The texture assigned to a slot, if any
    pub fn get(&self, slot: TextureSlot) -> Option<TextureId> {
        match slot {
            TextureSlot::Diffuse => self.diffuse,
            TextureSlot::Normal => self.normal,
            TextureSlot::Albedo => self.albedo,
            TextureSlot::Metallic => self.metallic,
            TextureSlot::Roughness => self.roughness,
            TextureSlot::AmbientOcclusion => self.ambient_occlusion,
            TextureSlot::Cubemap => self.cubemap,
            TextureSlot::Irradiance => self.irradiance,
            TextureSlot::Prefilter => self.prefilter,
            TextureSlot::BrdfLut => self.brdf_lut,
        }
    }

    /// Present slots with their textures, in binding order
    pub fn present(&self) -> Vec<(TextureSlot, TextureId)> {
        TextureSlot::ALL
            .iter()
            .filter_map(|&slot| self.get(slot).map(|id| (slot, id)))
            .collect()
    }

    /// Bitmask over slot indices; materials with equal masks share a
    /// descriptor-set layout
    pub fn slot_mask(&self) -> u32 {
        TextureSlot::ALL
            .iter()
            .enumerate()
            .filter(|(_, &slot)| self.get(slot).is_some())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

/// Creation info for a shader pair
pub struct ShaderCreateInfo<'a> {
    /// SPIR-V bytecode for the vertex stage (opaque blob)
    pub vertex_spirv: &'a [u8],
    /// SPIR-V bytecode for the fragment stage (opaque blob)
    pub fragment_spirv: &'a [u8],
    /// Vertex attributes the vertex stage consumes
    pub attributes: VertexAttributes,
}

/// Creation info for a texture
pub struct TextureCreateInfo<'a> {
    /// Tightly packed pixel data
    pub pixels: &'a [u8],
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format of `pixels`
    pub format: TextureFormat,
}

/// Creation info for a material
pub struct MaterialCreateInfo {
    /// Shader the material renders with
    pub shader: ShaderId,
    /// Sparse texture assignment
    pub textures: MaterialTextures,
}

/// Creation info for a render object
pub struct RenderObjectCreateInfo<'a> {
    /// Material to render with
    pub material: MaterialId,
    /// Packed vertex data matching the shader's attribute mask
    pub vertex_data: &'a [u8],
    /// Number of vertices in `vertex_data`
    pub vertex_count: u32,
    /// Optional index data; `None` draws non-indexed
    pub indices: Option<&'a [u32]>,
    /// Primitive topology
    pub topology: Topology,
    /// Face culling mode
    pub cull_mode: CullMode,
    /// Initial world transform
    pub transform: Matrix4<f32>,
    /// Initial visibility
    pub visible: bool,
}

/// Single capability interface over a rendering backend
pub trait GraphicsBackend {
    /// Device-level setup: passes, pools, buffers, sync objects
    fn initialize(&mut self) -> Result<(), RenderError>;

    /// Record initial command buffers once the scene's objects exist
    fn post_initialize(&mut self) -> Result<(), RenderError>;

    /// Create a shader pair from SPIR-V blobs
    fn create_shader(&mut self, info: &ShaderCreateInfo<'_>) -> Result<ShaderId, RenderError>;

    /// Create and upload a texture
    fn create_texture(&mut self, info: &TextureCreateInfo<'_>) -> Result<TextureId, RenderError>;

    /// Create a material
    fn create_material(&mut self, info: &MaterialCreateInfo) -> Result<MaterialId, RenderError>;

    /// Register a render object and upload its geometry
    fn initialize_render_object(
        &mut self,
        info: &RenderObjectCreateInfo<'_>,
    ) -> Result<RenderId, RenderError>;

    /// Build the object's pipeline and descriptor set
    fn post_initialize_render_object(&mut self, id: RenderId) -> Result<(), RenderError>;

    /// Toggle an object's visibility
    fn set_render_object_visible(&mut self, id: RenderId, visible: bool)
        -> Result<(), RenderError>;

    /// Destroy a render object and release its GPU resources
    fn destroy(&mut self, id: RenderId) -> Result<(), RenderError>;

    /// Push a new world transform for an object
    fn update_transform_matrix(
        &mut self,
        id: RenderId,
        transform: Matrix4<f32>,
    ) -> Result<(), RenderError>;

    /// Change an object's topology; rebuilds its pipeline
    fn set_topology(&mut self, id: RenderId, topology: Topology) -> Result<(), RenderError>;

    /// Change an object's cull mode; rebuilds its pipeline
    fn set_cull_mode(&mut self, id: RenderId, cull_mode: CullMode) -> Result<(), RenderError>;

    /// Set the camera matrices feeding the constant uniform buffer
    fn set_view_projection(&mut self, view: &Matrix4<f32>, projection: &Matrix4<f32>);

    /// Toggle vsync; takes effect at the next swapchain rebuild
    fn set_vsync_enabled(&mut self, enabled: bool);

    /// Set the background clear color
    fn set_clear_color(&mut self, r: f32, g: f32, b: f32);

    /// Notify the renderer of a new framebuffer size
    fn on_window_size(&mut self, width: u32, height: u32);

    /// Prepare the frame: upload uniforms, re-record if anything is dirty
    fn draw(&mut self) -> Result<(), RenderError>;

    /// Acquire, submit and present the frame
    fn swap_buffers(&mut self) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn texture_ids(n: usize) -> Vec<TextureId> {
        let mut map: SlotMap<TextureId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn slot_bindings_start_after_uniform_buffers() {
        assert_eq!(TextureSlot::Diffuse.binding(), 2);
        assert_eq!(TextureSlot::Normal.binding(), 3);
        assert_eq!(TextureSlot::BrdfLut.binding(), 11);
    }

    #[test]
    fn present_slots_follow_binding_order() {
        let ids = texture_ids(2);
        let textures = MaterialTextures {
            normal: Some(ids[1]),
            diffuse: Some(ids[0]),
            ..Default::default()
        };
        let present = textures.present();
        assert_eq!(present.len(), 2);
        assert_eq!(present[0].0, TextureSlot::Diffuse);
        assert_eq!(present[1].0, TextureSlot::Normal);
    }

    #[test]
    fn slot_mask_groups_equal_shapes() {
        let ids = texture_ids(3);
        let a = MaterialTextures {
            diffuse: Some(ids[0]),
            normal: Some(ids[1]),
            ..Default::default()
        };
        // Same shape, different textures
        let b = MaterialTextures {
            diffuse: Some(ids[2]),
            normal: Some(ids[0]),
            ..Default::default()
        };
        // Different shape
        let c = MaterialTextures {
            diffuse: Some(ids[0]),
            ..Default::default()
        };

        assert_eq!(a.slot_mask(), b.slot_mask());
        assert_ne!(a.slot_mask(), c.slot_mask());
        assert_eq!(MaterialTextures::default().slot_mask(), 0);
    }
}
