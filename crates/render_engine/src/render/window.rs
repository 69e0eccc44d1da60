//! Narrow window interface consumed by the rendering backend
//!
//! The engine never owns a window. Whatever windowing system the application
//! uses (the demo app uses GLFW) only has to answer three questions: which
//! instance extensions the surface needs, how to create that surface, and how
//! large the framebuffer currently is.

use ash::vk;
use thiserror::Error;

/// Window collaborator errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// The windowing backend could not report required Vulkan extensions
    #[error("failed to query required instance extensions: {0}")]
    ExtensionQueryFailed(String),

    /// Surface creation through the windowing backend failed
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),
}

/// The surface-facing view of a window.
///
/// Implemented by the application's window wrapper; the renderer calls these
/// during initialization and on resize, and nothing else.
pub trait RenderWindow {
    /// Instance extensions the windowing system needs for surface creation
    fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError>;

    /// Create a presentable surface for the given instance
    fn create_vulkan_surface(
        &mut self,
        instance: vk::Instance,
    ) -> Result<vk::SurfaceKHR, WindowError>;

    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}
