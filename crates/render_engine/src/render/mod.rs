//! Rendering system
//!
//! `api` is what applications program against; `backends` holds the Vulkan
//! implementation; `window` is the narrow interface a windowing system must
//! satisfy.

pub mod api;
pub mod backends;
pub mod window;

pub use api::{GraphicsBackend, MaterialId, RenderError, RenderId, ShaderId, TextureId};
pub use backends::vulkan::VulkanRenderer;
pub use window::{RenderWindow, WindowError};
