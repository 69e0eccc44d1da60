//! GLFW window wrapper
//!
//! Owns the window and event queue and satisfies the renderer's
//! `RenderWindow` interface for surface creation.

use render_engine::prelude::{RenderWindow, WindowError};

/// GLFW window with Vulkan surface support
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window configured for Vulkan (no client API)
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self, String> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| format!("GLFW initialization failed: {:?}", e))?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or_else(|| "window creation failed".to_string())?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain pending events
    pub fn flush_events(&self) -> Vec<glfw::WindowEvent> {
        glfw::flush_messages(&self.events)
            .map(|(_, event)| event)
            .collect()
    }
}

impl RenderWindow for Window {
    fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| {
                WindowError::ExtensionQueryFailed("GLFW reported no Vulkan support".to_string())
            })
    }

    fn create_vulkan_surface(
        &mut self,
        instance: ash::vk::Instance,
    ) -> Result<ash::vk::SurfaceKHR, WindowError> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::SurfaceCreationFailed(format!("{:?}", result)))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width as u32, height as u32)
    }
}
