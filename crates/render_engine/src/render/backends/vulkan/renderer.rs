//! The Vulkan renderer
//!
//! Owns every GPU resource table and drives the per-frame pipeline:
//!
//! ```text
//! draw():         rebuild-if-needed -> upload uniforms -> re-record-if-dirty
//! swap_buffers(): wait fence -> acquire -> submit -> present
//! ```
//!
//! An OutOfDate result at acquire abandons the frame with zero submissions
//! and flags the swapchain for rebuild; OutOfDate or Suboptimal at present
//! flags the rebuild for the next frame. Rebuilds and all resource teardown
//! wait for device idle first, which is what makes destroying pipelines,
//! framebuffers and command buffers safe while frames are in flight.

use std::collections::HashMap;

use ash::vk;
use nalgebra::Matrix4;
use slotmap::SlotMap;

use crate::config::RendererConfig;
use crate::render::api::{
    CullMode, GraphicsBackend, MaterialCreateInfo, MaterialId, MaterialTextures, RenderError,
    RenderId, RenderObjectCreateInfo, ShaderCreateInfo, ShaderId, TextureCreateInfo,
    TextureFormat, TextureId, Topology,
};
use crate::render::backends::vulkan::buffer::GeometryBuffer;
use crate::render::backends::vulkan::commands::CommandPool;
use crate::render::backends::vulkan::context::VulkanContext;
use crate::render::backends::vulkan::descriptor::{
    allocate_and_write, DescriptorPool, DescriptorSetCreateInfo, DescriptorSetLayout,
    DescriptorSetLayoutBuilder,
};
use crate::render::backends::vulkan::framebuffer::{DepthBuffer, Framebuffer, OffscreenTarget};
use crate::render::backends::vulkan::objects::{
    cull_mode_to_vk, topology_to_vk, Material, RenderObject, Shader,
};
use crate::render::backends::vulkan::pipeline::{
    GraphicsPipeline, GraphicsPipelineCreateInfo, ShaderModule,
};
use crate::render::backends::vulkan::recorder::{
    sort_draws, CommandBufferRecorder, DrawCommand, RecordInputs,
};
use crate::render::backends::vulkan::render_pass::RenderPass;
use crate::render::backends::vulkan::swapchain::{
    plan_swapchain, SurfaceParams, Swapchain, SwapchainState,
};
use crate::render::backends::vulkan::sync::{FrameSync, Semaphore};
use crate::render::backends::vulkan::texture::Texture;
use crate::render::backends::vulkan::uniform::{
    ObjectUniformData, SceneUniformData, UniformBufferPair,
};
use crate::render::backends::vulkan::vertex_layout;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::window::RenderWindow;

/// Whether the frame driver may draw, must rebuild first, or must skip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameAdmission {
    /// Swapchain consistent; draw and present
    Proceed,
    /// Rebuild the swapchain, then draw
    RebuildFirst,
    /// No usable swapchain; submit nothing
    Skip,
}

pub(crate) fn frame_admission(state: SwapchainState) -> FrameAdmission {
    match state {
        SwapchainState::Created => FrameAdmission::Proceed,
        SwapchainState::NeedsRebuild => FrameAdmission::RebuildFirst,
        SwapchainState::Uninitialized | SwapchainState::Destroyed => FrameAdmission::Skip,
    }
}

/// Outcome of an image acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireStep {
    /// Image acquired; when suboptimal, rebuild after presenting
    Draw {
        /// Acquired swapchain image index
        image_index: u32,
        /// Surface no longer matches exactly; rebuild after this frame
        suboptimal: bool,
    },
    /// Abandon the frame entirely and rebuild; zero submissions
    SkipAndRebuild,
    /// Unexpected result; fatal
    Fatal(vk::Result),
}

pub(crate) fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> AcquireStep {
    match result {
        Ok((image_index, suboptimal)) => AcquireStep::Draw {
            image_index,
            suboptimal,
        },
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => AcquireStep::SkipAndRebuild,
        Err(e) => AcquireStep::Fatal(e),
    }
}

/// Outcome of a present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PresentStep {
    /// Presented; frame complete
    Done,
    /// Presented or failed recoverably; rebuild before the next frame
    NeedsRebuild,
    /// Unexpected result; fatal
    Fatal(vk::Result),
}

pub(crate) fn classify_present(result: Result<bool, vk::Result>) -> PresentStep {
    match result {
        Ok(false) => PresentStep::Done,
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentStep::NeedsRebuild,
        Err(e) => PresentStep::Fatal(e),
    }
}

/// Everything built by `initialize`, torn down as one unit before the context
struct RendererState {
    objects: SlotMap<RenderId, RenderObject>,
    materials: SlotMap<MaterialId, Material>,
    shaders: SlotMap<ShaderId, Shader>,
    textures: SlotMap<TextureId, Texture>,
    default_texture: Texture,
    descriptor_layouts: Vec<DescriptorSetLayout>,
    layout_indices: HashMap<u32, usize>,
    descriptor_pool: DescriptorPool,
    uniforms: UniformBufferPair,
    geometry: GeometryBuffer,
    recorder: CommandBufferRecorder,
    upload_pool: CommandPool,
    framebuffers: Vec<Framebuffer>,
    depth_buffers: Vec<DepthBuffer>,
    render_pass: RenderPass,
    render_pass_format: vk::Format,
    frame_syncs: Vec<FrameSync>,
    render_finished: Vec<Semaphore>,
    swapchain: Option<Swapchain>,
    swapchain_state: SwapchainState,
    current_frame: usize,
    free_dynamic_indices: Vec<u32>,
    next_dynamic_index: u32,
}

/// Vulkan implementation of the graphics backend
pub struct VulkanRenderer {
    // State drops before the context; context must outlive every resource
    state: Option<RendererState>,
    scene_data: SceneUniformData,
    clear_color: [f32; 4],
    vsync: bool,
    window_extent: vk::Extent2D,
    config: RendererConfig,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Create the device-level context; `initialize` builds the rest
    pub fn new(window: &mut dyn RenderWindow, config: RendererConfig) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(VulkanError::InitializationFailed)?;

        let enable_validation = config
            .enable_validation
            .unwrap_or(cfg!(debug_assertions));

        let context = VulkanContext::new(
            window,
            &config.application_name,
            config.application_version,
            enable_validation,
        )?;

        let (width, height) = window.framebuffer_size();

        let clear = config.clear_color;
        Ok(Self {
            state: None,
            scene_data: SceneUniformData::default(),
            clear_color: [clear[0], clear[1], clear[2], 1.0],
            vsync: config.vsync,
            window_extent: vk::Extent2D { width, height },
            config,
            context,
        })
    }

    fn state_mut(&mut self) -> Result<&mut RendererState, RenderError> {
        self.state
            .as_mut()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "renderer not initialized".to_string(),
            })
            .map_err(RenderError::from)
    }

    fn init_state(&mut self) -> VulkanResult<RendererState> {
        let ctx = &self.context;
        let device = ctx.raw_device();

        let params = SurfaceParams::query(ctx.surface_loader(), ctx.physical_device(), ctx.surface())?;
        let plan = plan_swapchain(&params, self.window_extent, self.vsync)?;
        let swapchain = Swapchain::new(ctx, &plan, vk::SwapchainKHR::null())?;

        let render_pass = RenderPass::new_forward_pass(device.clone(), plan.format)?;

        let mut depth_buffers = Vec::with_capacity(swapchain.image_count());
        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for &image_view in swapchain.image_views() {
            let depth = DepthBuffer::new(
                device.clone(),
                ctx.instance(),
                ctx.physical_device().device,
                swapchain.extent(),
            )?;
            let framebuffer = Framebuffer::new(
                device.clone(),
                render_pass.handle(),
                &[image_view, depth.image_view()],
                swapchain.extent(),
            )?;
            depth_buffers.push(depth);
            framebuffers.push(framebuffer);
        }

        let mut recorder =
            CommandBufferRecorder::new(device.clone(), ctx.physical_device().graphics_family)?;
        recorder.ensure_command_buffers(swapchain.image_count())?;

        let upload_pool =
            CommandPool::new(device.clone(), ctx.physical_device().graphics_family)?;

        let descriptor_pool = DescriptorPool::new(device.clone(), self.config.max_render_objects)?;

        let geometry = GeometryBuffer::new(
            device.clone(),
            ctx.instance(),
            ctx.physical_device().device,
            self.config.vertex_buffer_capacity,
            self.config.index_buffer_capacity,
        )?;

        let uniforms = UniformBufferPair::new(
            device.clone(),
            ctx.instance(),
            ctx.physical_device().device,
            ctx.physical_device().min_uniform_buffer_offset_alignment(),
            self.config.initial_object_capacity,
        )?;

        // 1x1 white fallback for absent or stale texture IDs
        let default_texture = Texture::from_pixels(
            device.clone(),
            ctx.instance(),
            ctx.physical_device().device,
            &upload_pool,
            ctx.graphics_queue(),
            &[255, 255, 255, 255],
            1,
            1,
            vk::Format::R8G8B8A8_UNORM,
        )?;

        let mut frame_syncs = Vec::with_capacity(self.config.max_frames_in_flight);
        for _ in 0..self.config.max_frames_in_flight {
            frame_syncs.push(FrameSync::new(device.clone())?);
        }

        let mut render_finished = Vec::with_capacity(swapchain.image_count());
        for _ in 0..swapchain.image_count() {
            render_finished.push(Semaphore::new(device.clone())?);
        }

        log::info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            swapchain.image_count(),
            self.config.max_frames_in_flight
        );

        Ok(RendererState {
            objects: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            default_texture,
            descriptor_layouts: Vec::new(),
            layout_indices: HashMap::new(),
            descriptor_pool,
            uniforms,
            geometry,
            recorder,
            upload_pool,
            framebuffers,
            depth_buffers,
            render_pass,
            render_pass_format: plan.format,
            frame_syncs,
            render_finished,
            swapchain: Some(swapchain),
            swapchain_state: SwapchainState::Created,
            current_frame: 0,
            free_dynamic_indices: Vec::new(),
            next_dynamic_index: 0,
        })
    }

    /// Descriptor-set layout index for a material slot shape, creating the
    /// layout on first sight of the shape
    fn ensure_layout(
        state: &mut RendererState,
        context: &VulkanContext,
        textures: &MaterialTextures,
    ) -> VulkanResult<usize> {
        let mask = textures.slot_mask();
        if let Some(&index) = state.layout_indices.get(&mask) {
            return Ok(index);
        }

        let mut builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .add_dynamic_uniform_buffer(1, vk::ShaderStageFlags::VERTEX);
        for (slot, _) in textures.present() {
            builder = builder.add_combined_image_sampler(
                slot.binding(),
                vk::ShaderStageFlags::FRAGMENT,
            );
        }

        let layout = builder.build(&context.raw_device())?;
        let index = state.descriptor_layouts.len();
        state.descriptor_layouts.push(layout);
        state.layout_indices.insert(mask, index);
        log::debug!("New descriptor layout group {} (slot mask {:#x})", index, mask);
        Ok(index)
    }

    /// Build (or rebuild) one object's pipeline against the current render
    /// pass. The caller must have waited for device idle when replacing a
    /// pipeline that may still be referenced by submitted work.
    fn build_pipeline(
        state: &RendererState,
        context: &VulkanContext,
        id: RenderId,
    ) -> Result<GraphicsPipeline, RenderError> {
        let object = state
            .objects
            .get(id)
            .ok_or(RenderError::UnknownRenderObject)?;
        let material = state
            .materials
            .get(object.material)
            .ok_or(RenderError::UnknownResource("material"))?;
        let shader = state
            .shaders
            .get(material.shader)
            .ok_or(RenderError::UnknownResource("shader"))?;
        let layout = state.descriptor_layouts[material.descriptor_set_layout_index].handle();

        let extent = state
            .swapchain
            .as_ref()
            .map_or(vk::Extent2D { width: 1, height: 1 }, |s| s.extent());

        let info = GraphicsPipelineCreateInfo {
            vertex_shader: &shader.vertex,
            fragment_shader: &shader.fragment,
            attributes: shader.attributes,
            topology: topology_to_vk(object.topology),
            cull_mode: cull_mode_to_vk(object.cull_mode),
            render_pass: state.render_pass.handle(),
            subpass: 0,
            depth_test: true,
            depth_write: true,
            push_constant_ranges: &[],
            descriptor_set_layouts: &[layout],
            dynamic_viewport_scissor: true,
            enable_blending: false,
            color_attachment_count: 1,
            extent,
        };

        GraphicsPipeline::new(&context.raw_device(), &info).map_err(RenderError::from)
    }

    /// Allocate and write the object's descriptor set from its material
    fn build_descriptor_set(
        state: &RendererState,
        context: &VulkanContext,
        id: RenderId,
    ) -> Result<vk::DescriptorSet, RenderError> {
        let object = state
            .objects
            .get(id)
            .ok_or(RenderError::UnknownRenderObject)?;
        let material = state
            .materials
            .get(object.material)
            .ok_or(RenderError::UnknownResource("material"))?;
        let layout = state.descriptor_layouts[material.descriptor_set_layout_index].handle();

        let resolved: Vec<(u32, vk::ImageView, vk::Sampler)> = material
            .textures
            .present()
            .into_iter()
            .map(|(slot, texture_id)| {
                let texture = state.textures.get(texture_id).unwrap_or_else(|| {
                    log::warn!("texture id for slot {:?} is stale; using fallback", slot);
                    &state.default_texture
                });
                (slot.binding(), texture.view(), texture.sampler())
            })
            .collect();

        let info = DescriptorSetCreateInfo {
            layout,
            constant_buffer: state.uniforms.constant.descriptor(),
            dynamic_buffer: state.uniforms.dynamic.descriptor(),
            textures: &resolved,
        };

        allocate_and_write(&context.raw_device(), &state.descriptor_pool, &info)
            .map_err(RenderError::from)
    }

    /// Grow the dynamic uniform buffer to the live object count and rewrite
    /// every descriptor set's dynamic binding when the buffer was replaced.
    fn ensure_dynamic_capacity(&mut self) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };

        let needed = state.next_dynamic_index;
        if needed <= state.uniforms.dynamic.capacity() {
            return Ok(());
        }

        // The old buffer may be referenced by in-flight frames
        context.wait_idle()?;

        let grown = needed.max(state.uniforms.dynamic.capacity() * 2);
        state.uniforms.dynamic.grow(
            context.raw_device(),
            context.instance(),
            context.physical_device().device,
            std::mem::size_of::<ObjectUniformData>() as vk::DeviceSize,
            context
                .physical_device()
                .min_uniform_buffer_offset_alignment(),
            grown,
        )?;
        log::debug!("Dynamic uniform buffer grown to {} slots", grown);

        // Every live set still points at the old buffer
        let dynamic_info = state.uniforms.dynamic.descriptor();
        let device = context.raw_device();
        for (_, object) in &state.objects {
            if let Some(set) = object.descriptor_set {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .buffer_info(std::slice::from_ref(&dynamic_info))
                    .build();
                unsafe {
                    device.update_descriptor_sets(&[write], &[]);
                }
            }
        }

        Ok(())
    }

    /// Stage every object's transform and upload the uniform buffers
    fn upload_uniforms(&mut self) -> Result<(), RenderError> {
        let scene_data = self.scene_data;
        let state = self.state_mut()?;

        state.uniforms.update_constant(&scene_data)?;

        for (_, object) in &state.objects {
            let data = ObjectUniformData::new(&object.transform);
            state
                .uniforms
                .dynamic
                .update(object.dynamic_index, bytemuck::bytes_of(&data))?;
        }
        state.uniforms.dynamic.upload()?;
        Ok(())
    }

    /// Re-record all command buffers when anything recorded has changed
    fn record_if_dirty(&mut self) -> Result<(), RenderError> {
        let clear_color = self.clear_color;
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };
        let swapchain = match state.swapchain.as_ref() {
            Some(swapchain) => swapchain,
            None => return Ok(()),
        };

        let image_count = swapchain.image_count();
        if state.recorder.check_command_buffers(image_count) && !state.recorder.is_dirty() {
            return Ok(());
        }

        // Buffers being re-recorded may still be executing
        context.wait_idle()?;
        state.recorder.ensure_command_buffers(image_count)?;

        let mut draws: Vec<DrawCommand> = Vec::new();
        for (_, object) in &state.objects {
            if !object.visible {
                continue;
            }
            let (pipeline, descriptor_set) = match (&object.pipeline, object.descriptor_set) {
                (Some(pipeline), Some(set)) => (pipeline, set),
                _ => continue,
            };
            let material = match state.materials.get(object.material) {
                Some(material) => material,
                None => continue,
            };
            let (index_offset, index_count) = object
                .index_region
                .map_or((0, 0), |region| (region.offset, region.count));

            draws.push(DrawCommand {
                pipeline: pipeline.handle(),
                pipeline_layout: pipeline.layout(),
                descriptor_set,
                layout_index: material.descriptor_set_layout_index,
                dynamic_offset: state.uniforms.dynamic.offset_of(object.dynamic_index),
                vertex_offset: object.vertex_region.offset,
                vertex_count: object.vertex_region.count,
                index_offset,
                index_count,
            });
        }
        sort_draws(&mut draws);

        let framebuffers: Vec<vk::Framebuffer> =
            state.framebuffers.iter().map(|fb| fb.handle()).collect();

        let inputs = RecordInputs {
            render_pass: state.render_pass.handle(),
            framebuffers: &framebuffers,
            extent: swapchain.extent(),
            clear_color,
            draws: &draws,
            vertex_buffer: state.geometry.vertex_handle(),
            index_buffer: state.geometry.index_handle(),
        };

        state.recorder.record_all(&inputs)?;
        Ok(())
    }

    /// Atomic swapchain rebuild.
    ///
    /// Wait idle, drop per-image resources in reverse-dependency order,
    /// re-query the surface, recreate with the old swapchain as the reuse
    /// hint, then recreate the per-image resources. Any failure leaves the
    /// state `Uninitialized` with no partial resources observable.
    fn rebuild_swapchain(&mut self) -> Result<(), RenderError> {
        let window_extent = self.window_extent;
        let vsync = self.vsync;
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };

        // A minimized window has no drawable surface; stay in NeedsRebuild
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(());
        }

        log::info!(
            "Rebuilding swapchain ({}x{})",
            window_extent.width,
            window_extent.height
        );

        context.wait_idle()?;

        // Reverse dependency order: command buffers, framebuffers, depth,
        // then (inside the rebuild) the swapchain itself
        state.recorder.destroy_command_buffers();
        state.framebuffers.clear();
        state.depth_buffers.clear();
        state.render_finished.clear();

        match Self::try_rebuild(state, context, window_extent, vsync) {
            Ok(()) => {
                state.swapchain_state = SwapchainState::Created;
                state.recorder.mark_dirty();
                Ok(())
            }
            Err(e) => {
                // All-or-nothing: no partial swapchain is observable
                state.swapchain = None;
                state.framebuffers.clear();
                state.depth_buffers.clear();
                state.render_finished.clear();
                state.recorder.destroy_command_buffers();
                state.swapchain_state = SwapchainState::Uninitialized;
                log::error!("Swapchain rebuild failed: {}", e);
                Err(e)
            }
        }
    }

    fn try_rebuild(
        state: &mut RendererState,
        context: &VulkanContext,
        window_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<(), RenderError> {
        let device = context.raw_device();

        let params = SurfaceParams::query(
            context.surface_loader(),
            context.physical_device(),
            context.surface(),
        )?;
        let plan = plan_swapchain(&params, window_extent, vsync)?;

        let old = state.swapchain.take();
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.handle());
        let swapchain = Swapchain::new(context, &plan, old_handle)?;
        // The old swapchain may be destroyed only after the new one exists
        drop(old);

        // A format change invalidates the render pass and every pipeline
        if plan.format != state.render_pass_format {
            log::info!(
                "Surface format changed {:?} -> {:?}; rebuilding render pass and pipelines",
                state.render_pass_format,
                plan.format
            );
            state.render_pass = RenderPass::new_forward_pass(device.clone(), plan.format)?;
            state.render_pass_format = plan.format;

            let ids: Vec<RenderId> = state
                .objects
                .iter()
                .filter(|(_, object)| object.pipeline.is_some())
                .map(|(id, _)| id)
                .collect();
            for id in ids {
                let pipeline = Self::build_pipeline(state, context, id)?;
                if let Some(object) = state.objects.get_mut(id) {
                    object.pipeline = Some(pipeline);
                }
            }
        }

        for &image_view in swapchain.image_views() {
            let depth = DepthBuffer::new(
                device.clone(),
                context.instance(),
                context.physical_device().device,
                swapchain.extent(),
            )?;
            let framebuffer = Framebuffer::new(
                device.clone(),
                state.render_pass.handle(),
                &[image_view, depth.image_view()],
                swapchain.extent(),
            )?;
            state.depth_buffers.push(depth);
            state.framebuffers.push(framebuffer);
        }

        for _ in 0..swapchain.image_count() {
            state.render_finished.push(Semaphore::new(device.clone())?);
        }

        state.recorder.ensure_command_buffers(swapchain.image_count())?;
        state.swapchain = Some(swapchain);
        Ok(())
    }

    /// Create a multi-attachment G-buffer target for a deferred pass
    pub fn create_gbuffer_target(&self, width: u32, height: u32) -> VulkanResult<OffscreenTarget> {
        OffscreenTarget::gbuffer(
            self.context.raw_device(),
            self.context.instance(),
            self.context.physical_device().device,
            vk::Extent2D { width, height },
        )
    }

    /// Create a single-attachment offscreen capture target
    pub fn create_capture_target(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> VulkanResult<OffscreenTarget> {
        OffscreenTarget::capture(
            self.context.raw_device(),
            self.context.instance(),
            self.context.physical_device().device,
            vk::Extent2D { width, height },
            format,
        )
    }

    /// Dynamic slot assignment with free-list reuse
    fn assign_dynamic_index(state: &mut RendererState) -> u32 {
        if let Some(index) = state.free_dynamic_indices.pop() {
            index
        } else {
            let index = state.next_dynamic_index;
            state.next_dynamic_index += 1;
            index
        }
    }
}

impl GraphicsBackend for VulkanRenderer {
    fn initialize(&mut self) -> Result<(), RenderError> {
        if self.state.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "renderer already initialized".to_string(),
            }
            .into());
        }
        let state = self.init_state()?;
        self.state = Some(state);
        Ok(())
    }

    fn post_initialize(&mut self) -> Result<(), RenderError> {
        self.state_mut()?;
        self.record_if_dirty()
    }

    fn create_shader(&mut self, info: &ShaderCreateInfo<'_>) -> Result<ShaderId, RenderError> {
        let device = self.context.raw_device();
        let state = self.state_mut()?;

        let vertex = ShaderModule::from_bytes(&device, info.vertex_spirv)?;
        let fragment = ShaderModule::from_bytes(&device, info.fragment_spirv)?;

        Ok(state.shaders.insert(Shader {
            vertex,
            fragment,
            attributes: info.attributes,
        }))
    }

    fn create_texture(&mut self, info: &TextureCreateInfo<'_>) -> Result<TextureId, RenderError> {
        let expected = info.width as usize * info.height as usize * 4;
        if info.pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture data is {} bytes, expected {}",
                    info.pixels.len(),
                    expected
                ),
            }
            .into());
        }

        let format = match info.format {
            TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        };

        let device = self.context.raw_device();
        let context = &self.context;
        let state = self.state.as_mut().ok_or_else(|| {
            RenderError::from(VulkanError::InvalidOperation {
                reason: "renderer not initialized".to_string(),
            })
        })?;

        let texture = Texture::from_pixels(
            device,
            context.instance(),
            context.physical_device().device,
            &state.upload_pool,
            context.graphics_queue(),
            info.pixels,
            info.width,
            info.height,
            format,
        )?;

        Ok(state.textures.insert(texture))
    }

    fn create_material(&mut self, info: &MaterialCreateInfo) -> Result<MaterialId, RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => {
                return Err(VulkanError::InvalidOperation {
                    reason: "renderer not initialized".to_string(),
                }
                .into())
            }
        };

        if !state.shaders.contains_key(info.shader) {
            return Err(RenderError::UnknownResource("shader"));
        }

        let layout_index = Self::ensure_layout(state, context, &info.textures)?;

        Ok(state.materials.insert(Material {
            shader: info.shader,
            textures: info.textures,
            descriptor_set_layout_index: layout_index,
        }))
    }

    fn initialize_render_object(
        &mut self,
        info: &RenderObjectCreateInfo<'_>,
    ) -> Result<RenderId, RenderError> {
        let state = self.state_mut()?;

        let material = state
            .materials
            .get(info.material)
            .ok_or(RenderError::UnknownResource("material"))?;
        let shader = state
            .shaders
            .get(material.shader)
            .ok_or(RenderError::UnknownResource("shader"))?;

        let stride = vertex_layout::vertex_stride(shader.attributes) as usize;
        if stride != 0 && info.vertex_data.len() != info.vertex_count as usize * stride {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "vertex data is {} bytes, expected {} ({} vertices x stride {})",
                    info.vertex_data.len(),
                    info.vertex_count as usize * stride,
                    info.vertex_count,
                    stride
                ),
            }
            .into());
        }

        let vertex_region = state
            .geometry
            .upload_vertices(info.vertex_data, info.vertex_count)?;
        let index_region = match info.indices {
            Some(indices) => Some(state.geometry.upload_indices(indices)?),
            None => None,
        };

        let dynamic_index = Self::assign_dynamic_index(state);

        let id = state.objects.insert(RenderObject {
            material: info.material,
            vertex_region,
            index_region,
            topology: info.topology,
            cull_mode: info.cull_mode,
            pipeline: None,
            descriptor_set: None,
            dynamic_index,
            visible: info.visible,
            transform: info.transform,
        });

        log::debug!(
            "Render object registered: {} vertices, dynamic slot {}",
            info.vertex_count,
            dynamic_index
        );
        Ok(id)
    }

    fn post_initialize_render_object(&mut self, id: RenderId) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => {
                return Err(VulkanError::InvalidOperation {
                    reason: "renderer not initialized".to_string(),
                }
                .into())
            }
        };

        let pipeline = Self::build_pipeline(state, context, id)?;
        let descriptor_set = Self::build_descriptor_set(state, context, id)?;

        let object = state
            .objects
            .get_mut(id)
            .ok_or(RenderError::UnknownRenderObject)?;
        object.pipeline = Some(pipeline);
        object.descriptor_set = Some(descriptor_set);

        state.recorder.mark_dirty();
        Ok(())
    }

    fn set_render_object_visible(
        &mut self,
        id: RenderId,
        visible: bool,
    ) -> Result<(), RenderError> {
        let state = self.state_mut()?;
        let object = state
            .objects
            .get_mut(id)
            .ok_or(RenderError::UnknownRenderObject)?;
        if object.visible != visible {
            object.visible = visible;
            state.recorder.mark_dirty();
        }
        Ok(())
    }

    fn destroy(&mut self, id: RenderId) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };

        // Submitted command buffers may still reference the object's
        // pipeline and descriptor set
        context.wait_idle()?;

        let object = state
            .objects
            .remove(id)
            .ok_or(RenderError::UnknownRenderObject)?;

        if let Some(set) = object.descriptor_set {
            state.descriptor_pool.free(set)?;
        }
        state.free_dynamic_indices.push(object.dynamic_index);
        state.recorder.mark_dirty();

        log::debug!("Render object destroyed (dynamic slot {})", object.dynamic_index);
        Ok(())
    }

    fn update_transform_matrix(
        &mut self,
        id: RenderId,
        transform: Matrix4<f32>,
    ) -> Result<(), RenderError> {
        let state = self.state_mut()?;
        let object = state
            .objects
            .get_mut(id)
            .ok_or(RenderError::UnknownRenderObject)?;
        // Transforms flow through the dynamic buffer; no re-record needed
        object.transform = transform;
        Ok(())
    }

    fn set_topology(&mut self, id: RenderId, topology: Topology) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => {
                return Err(VulkanError::InvalidOperation {
                    reason: "renderer not initialized".to_string(),
                }
                .into())
            }
        };

        let needs_rebuild = {
            let object = state
                .objects
                .get_mut(id)
                .ok_or(RenderError::UnknownRenderObject)?;
            if object.topology == topology {
                false
            } else {
                object.topology = topology;
                object.pipeline.is_some()
            }
        };

        if needs_rebuild {
            // The old pipeline may still be referenced by in-flight frames
            context.wait_idle()?;
            let pipeline = Self::build_pipeline(state, context, id)?;
            if let Some(object) = state.objects.get_mut(id) {
                object.pipeline = Some(pipeline);
            }
            state.recorder.mark_dirty();
        }
        Ok(())
    }

    fn set_cull_mode(&mut self, id: RenderId, cull_mode: CullMode) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => {
                return Err(VulkanError::InvalidOperation {
                    reason: "renderer not initialized".to_string(),
                }
                .into())
            }
        };

        let needs_rebuild = {
            let object = state
                .objects
                .get_mut(id)
                .ok_or(RenderError::UnknownRenderObject)?;
            if object.cull_mode == cull_mode {
                false
            } else {
                object.cull_mode = cull_mode;
                object.pipeline.is_some()
            }
        };

        if needs_rebuild {
            context.wait_idle()?;
            let pipeline = Self::build_pipeline(state, context, id)?;
            if let Some(object) = state.objects.get_mut(id) {
                object.pipeline = Some(pipeline);
            }
            state.recorder.mark_dirty();
        }
        Ok(())
    }

    fn set_view_projection(&mut self, view: &Matrix4<f32>, projection: &Matrix4<f32>) {
        self.scene_data = SceneUniformData::new(view, projection);
    }

    fn set_vsync_enabled(&mut self, enabled: bool) {
        if self.vsync == enabled {
            return;
        }
        self.vsync = enabled;
        // Present mode is baked into the swapchain
        if let Some(state) = self.state.as_mut() {
            if state.swapchain_state == SwapchainState::Created {
                state.swapchain_state = SwapchainState::NeedsRebuild;
            }
        }
    }

    fn set_clear_color(&mut self, r: f32, g: f32, b: f32) {
        self.clear_color = [r, g, b, 1.0];
        // Clear values are recorded into the command buffers
        if let Some(state) = self.state.as_mut() {
            state.recorder.mark_dirty();
        }
    }

    fn on_window_size(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        if let Some(state) = self.state.as_mut() {
            if state.swapchain_state == SwapchainState::Created {
                state.swapchain_state = SwapchainState::NeedsRebuild;
            }
        }
    }

    fn draw(&mut self) -> Result<(), RenderError> {
        let admission = {
            let state = self.state_mut()?;
            frame_admission(state.swapchain_state)
        };

        match admission {
            FrameAdmission::Skip => return Ok(()),
            FrameAdmission::RebuildFirst => {
                self.rebuild_swapchain()?;
                let state = self.state_mut()?;
                if state.swapchain_state != SwapchainState::Created {
                    return Ok(());
                }
            }
            FrameAdmission::Proceed => {}
        }

        self.ensure_dynamic_capacity()?;
        self.upload_uniforms()?;
        self.record_if_dirty()
    }

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        let context = &self.context;
        let state = match self.state.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };

        if frame_admission(state.swapchain_state) != FrameAdmission::Proceed {
            // No partial frame is ever submitted
            return Ok(());
        }
        let swapchain_handle = match state.swapchain.as_ref() {
            Some(swapchain) => swapchain.handle(),
            None => return Ok(()),
        };

        state.frame_syncs[state.current_frame].in_flight.wait(u64::MAX)?;
        let image_available = state.frame_syncs[state.current_frame]
            .image_available
            .handle();

        let acquire_result = unsafe {
            context.swapchain_loader().acquire_next_image(
                swapchain_handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };

        let (image_index, suboptimal) = match classify_acquire(acquire_result) {
            AcquireStep::Draw {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireStep::SkipAndRebuild => {
                log::warn!("Swapchain out of date at acquire; abandoning frame");
                state.swapchain_state = SwapchainState::NeedsRebuild;
                return Ok(());
            }
            AcquireStep::Fatal(e) => return Err(VulkanError::from(e).into()),
        };

        // Reset only after a successful acquire so an abandoned frame leaves
        // the fence signaled for the next wait
        state.frame_syncs[state.current_frame].in_flight.reset()?;

        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [state.recorder.buffer(image_index as usize)];
        let signal_semaphores = [state.render_finished[image_index as usize].handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            context
                .raw_device()
                .queue_submit(
                    context.graphics_queue(),
                    &[submit_info],
                    state.frame_syncs[state.current_frame].in_flight.handle(),
                )
                .map_err(VulkanError::from)?;
        }

        let swapchains = [swapchain_handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe {
            context
                .swapchain_loader()
                .queue_present(context.present_queue(), &present_info)
        };

        match classify_present(present_result) {
            PresentStep::Done => {}
            PresentStep::NeedsRebuild => {
                log::warn!("Swapchain stale at present; rebuilding next frame");
                state.swapchain_state = SwapchainState::NeedsRebuild;
            }
            PresentStep::Fatal(e) => return Err(VulkanError::from(e).into()),
        }

        if suboptimal && state.swapchain_state == SwapchainState::Created {
            state.swapchain_state = SwapchainState::NeedsRebuild;
        }

        state.current_frame = (state.current_frame + 1) % state.frame_syncs.len();
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        // Nothing referencing the device may outlive the idle wait
        let _ = self.context.wait_idle();
        if let Some(state) = self.state.as_mut() {
            state.swapchain_state = SwapchainState::Destroyed;
        }
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_follows_swapchain_state() {
        assert_eq!(
            frame_admission(SwapchainState::Created),
            FrameAdmission::Proceed
        );
        assert_eq!(
            frame_admission(SwapchainState::NeedsRebuild),
            FrameAdmission::RebuildFirst
        );
        assert_eq!(
            frame_admission(SwapchainState::Uninitialized),
            FrameAdmission::Skip
        );
        assert_eq!(
            frame_admission(SwapchainState::Destroyed),
            FrameAdmission::Skip
        );
    }

    #[test]
    fn out_of_date_acquire_abandons_the_frame() {
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            AcquireStep::SkipAndRebuild
        );
        assert_eq!(
            classify_acquire(Ok((2, false))),
            AcquireStep::Draw {
                image_index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            AcquireStep::Fatal(vk::Result::ERROR_DEVICE_LOST)
        );
    }

    #[test]
    fn stale_present_requests_exactly_one_rebuild_and_no_draws() {
        // Present reports OutOfDate
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            PresentStep::NeedsRebuild
        );

        // Walk the frame state machine from that point
        let mut state = SwapchainState::NeedsRebuild;
        let mut rebuilds = 0;
        let mut draws_submitted = 0;

        // The frame that saw OutOfDate: rebuild happens before any draw
        match frame_admission(state) {
            FrameAdmission::RebuildFirst => {
                rebuilds += 1;
                state = SwapchainState::Created;
            }
            FrameAdmission::Proceed => draws_submitted += 1,
            FrameAdmission::Skip => {}
        }

        assert_eq!(rebuilds, 1);
        assert_eq!(draws_submitted, 0);
        assert_eq!(frame_admission(state), FrameAdmission::Proceed);
    }

    #[test]
    fn suboptimal_present_also_requests_rebuild() {
        assert_eq!(classify_present(Ok(true)), PresentStep::NeedsRebuild);
        assert_eq!(classify_present(Ok(false)), PresentStep::Done);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            PresentStep::Fatal(vk::Result::ERROR_DEVICE_LOST)
        );
    }
}
