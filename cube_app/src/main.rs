//! Spinning-cube demo
//!
//! Exercises the renderer end to end: window + surface, shader/material/
//! object creation, per-frame transform updates through the dynamic uniform
//! buffer, resize recovery, and vsync toggling at runtime.

mod window;

use nalgebra::{Matrix4, Perspective3, Point3, Vector3};
use render_engine::prelude::*;
use window::Window;

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

/// Interleaved position + color cube vertices
#[rustfmt::skip]
const CUBE_VERTICES: [f32; 8 * 7] = [
    // x,     y,     z,     r,   g,   b,   a
    -0.5,  -0.5,  -0.5,    1.0, 0.0, 0.0, 1.0,
     0.5,  -0.5,  -0.5,    0.0, 1.0, 0.0, 1.0,
     0.5,   0.5,  -0.5,    0.0, 0.0, 1.0, 1.0,
    -0.5,   0.5,  -0.5,    1.0, 1.0, 0.0, 1.0,
    -0.5,  -0.5,   0.5,    1.0, 0.0, 1.0, 1.0,
     0.5,  -0.5,   0.5,    0.0, 1.0, 1.0, 1.0,
     0.5,   0.5,   0.5,    1.0, 1.0, 1.0, 1.0,
    -0.5,   0.5,   0.5,    0.2, 0.2, 0.2, 1.0,
];

#[rustfmt::skip]
const CUBE_INDICES: [u32; 36] = [
    0, 1, 2,  2, 3, 0,  // back
    4, 6, 5,  6, 4, 7,  // front
    0, 4, 1,  1, 4, 5,  // bottom
    2, 6, 3,  3, 6, 7,  // top
    0, 3, 4,  3, 7, 4,  // left
    1, 5, 2,  2, 5, 6,  // right
];

fn projection(width: u32, height: u32) -> Matrix4<f32> {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    Perspective3::new(aspect, std::f32::consts::FRAC_PI_3, 0.1, 100.0).to_homogeneous()
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match RendererConfig::load("renderer.toml") {
        Ok(config) => config,
        Err(_) => RendererConfig::new("cube_app").with_clear_color(0.02, 0.03, 0.06),
    };

    let mut window = Window::new("cube_app", WINDOW_WIDTH, WINDOW_HEIGHT)?;

    let vertex_spirv = std::fs::read("shaders/cube.vert.spv")?;
    let fragment_spirv = std::fs::read("shaders/cube.frag.spv")?;

    let mut renderer = render_engine::VulkanRenderer::new(&mut window, config)?;
    renderer.initialize()?;

    let shader = renderer.create_shader(&ShaderCreateInfo {
        vertex_spirv: &vertex_spirv,
        fragment_spirv: &fragment_spirv,
        attributes: VertexAttributes::POSITION | VertexAttributes::COLOR,
    })?;

    let material = renderer.create_material(&MaterialCreateInfo {
        shader,
        textures: MaterialTextures::default(),
    })?;

    let vertex_bytes: &[u8] = unsafe {
        std::slice::from_raw_parts(
            CUBE_VERTICES.as_ptr().cast::<u8>(),
            std::mem::size_of_val(&CUBE_VERTICES),
        )
    };

    let cube = renderer.initialize_render_object(&RenderObjectCreateInfo {
        material,
        vertex_data: vertex_bytes,
        vertex_count: 8,
        indices: Some(&CUBE_INDICES),
        topology: Topology::TriangleList,
        cull_mode: CullMode::Back,
        transform: Matrix4::identity(),
        visible: true,
    })?;
    renderer.post_initialize_render_object(cube)?;
    renderer.post_initialize()?;

    let view = Matrix4::look_at_rh(
        &Point3::new(2.0, 2.0, 2.0),
        &Point3::origin(),
        &Vector3::y(),
    );
    renderer.set_view_projection(&view, &projection(WINDOW_WIDTH, WINDOW_HEIGHT));

    let start = std::time::Instant::now();
    let mut vsync = true;

    while !window.should_close() {
        window.poll_events();
        for event in window.flush_events() {
            match event {
                glfw::WindowEvent::Close => window.set_should_close(true),
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    window.set_should_close(true);
                }
                glfw::WindowEvent::Key(glfw::Key::V, _, glfw::Action::Press, _) => {
                    vsync = !vsync;
                    log::info!("vsync {}", if vsync { "on" } else { "off" });
                    renderer.set_vsync_enabled(vsync);
                }
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    renderer.on_window_size(width as u32, height as u32);
                    renderer.set_view_projection(&view, &projection(width as u32, height as u32));
                }
                _ => {}
            }
        }

        let angle = start.elapsed().as_secs_f32();
        let model = Matrix4::from_axis_angle(&Vector3::y_axis(), angle)
            * Matrix4::from_axis_angle(&Vector3::x_axis(), angle * 0.4);
        renderer.update_transform_matrix(cube, model)?;

        renderer.draw()?;
        renderer.swap_buffers()?;
    }

    Ok(())
}
