//! Backend-agnostic rendering API
//!
//! The capability surface the rest of the application programs against:
//! typed resource IDs, declarative creation infos, and the
//! [`GraphicsBackend`] trait. Nothing in here names a Vulkan type.

mod backend;

pub use backend::{
    CullMode, GraphicsBackend, MaterialCreateInfo, MaterialTextures, RenderError,
    RenderObjectCreateInfo, ShaderCreateInfo, TextureCreateInfo, TextureFormat, TextureSlot,
    Topology,
};

use bitflags::bitflags;
use slotmap::new_key_type;

new_key_type! {
    /// Stable handle for a render object
    pub struct RenderId;
    /// Stable handle for a material
    pub struct MaterialId;
    /// Stable handle for a shader pair
    pub struct ShaderId;
    /// Stable handle for a texture
    pub struct TextureId;
}

bitflags! {
    /// Vertex attributes present in a render object's vertex data.
    ///
    /// The bit order is also the attribute order in memory; see the
    /// backend's vertex layout derivation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexAttributes: u32 {
        /// vec3 position
        const POSITION = 1 << 0;
        /// vec4 color
        const COLOR = 1 << 1;
        /// vec3 tangent
        const TANGENT = 1 << 2;
        /// vec3 bitangent
        const BITANGENT = 1 << 3;
        /// vec3 normal
        const NORMAL = 1 << 4;
        /// vec2 texture coordinates
        const TEXCOORD = 1 << 5;
    }
}
