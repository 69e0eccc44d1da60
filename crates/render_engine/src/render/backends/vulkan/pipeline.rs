//! Shader modules and graphics pipeline construction
//!
//! A pipeline is built declaratively from [`GraphicsPipelineCreateInfo`];
//! everything the fixed-function stages need is derived from it. A render
//! object's pipeline must be rebuilt whenever its topology, cull mode,
//! shader, or attribute mask changes — and the old one destroyed only after
//! the GPU is done with it.

use ash::{vk, Device};

use crate::render::api::VertexAttributes;
use crate::render::backends::vulkan::vertex_layout;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// SPIR-V shader module wrapper with automatic resource management
///
/// Bytecode arrives as an opaque blob from the asset collaborator; the only
/// validation here is the 4-byte alignment SPIR-V requires.
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        let (prefix, u32_slice, suffix) = unsafe { bytes.align_to::<u32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "SPIR-V bytecode is not 4-byte aligned".to_string(),
            });
        }

        let create_info = vk::ShaderModuleCreateInfo::builder().code(u32_slice);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(|e| VulkanError::resource("shader module", e))?
        };

        log::debug!("Shader module created from {} bytes", bytes.len());
        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Declarative description of a graphics pipeline
pub struct GraphicsPipelineCreateInfo<'a> {
    /// Vertex stage module
    pub vertex_shader: &'a ShaderModule,
    /// Fragment stage module
    pub fragment_shader: &'a ShaderModule,
    /// Vertex attribute mask driving the input state
    pub attributes: VertexAttributes,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling mode
    pub cull_mode: vk::CullModeFlags,
    /// Target render pass
    pub render_pass: vk::RenderPass,
    /// Target subpass index
    pub subpass: u32,
    /// Enable depth testing
    pub depth_test: bool,
    /// Enable depth writes
    pub depth_write: bool,
    /// Push-constant ranges for the layout
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    /// Descriptor-set layouts for the layout
    pub descriptor_set_layouts: &'a [vk::DescriptorSetLayout],
    /// Use dynamic viewport/scissor instead of baking the extent in
    pub dynamic_viewport_scissor: bool,
    /// Enable standard alpha blending on the color attachments
    pub enable_blending: bool,
    /// Number of color attachments in the target subpass
    pub color_attachment_count: u32,
    /// Fixed viewport extent, used when dynamic state is off
    pub extent: vk::Extent2D,
}

/// Graphics pipeline with its layout, RAII cleanup
///
/// The pipeline is destroyed before its layout.
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a graphics pipeline from the creation info
    pub fn new(device: &Device, info: &GraphicsPipelineCreateInfo<'_>) -> VulkanResult<Self> {
        let entry_point = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(info.vertex_shader.handle())
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(info.fragment_shader.handle())
                .name(entry_point)
                .build(),
        ];

        // Vertex input state from the attribute mask
        let binding = vertex_layout::binding_description(info.attributes);
        let attribute_descs = vertex_layout::attribute_descriptions(info.attributes);
        let bindings = [binding];
        let vertex_input = if info.attributes.is_empty() {
            vk::PipelineVertexInputStateCreateInfo::builder().build()
        } else {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attribute_descs)
                .build()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(info.topology)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: info.extent.width as f32,
            height: info.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: info.extent,
        }];

        let viewport_state = if info.dynamic_viewport_scissor {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewport_count(1)
                .scissor_count(1)
                .build()
        } else {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewports(&viewports)
                .scissors(&scissors)
                .build()
        };

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(info.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.depth_test)
            .depth_write_enable(info.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachment = if info.enable_blending {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };

        // One blend state per color attachment (MRT targets need them all)
        let blend_attachments =
            vec![blend_attachment; info.color_attachment_count.max(1) as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(info.descriptor_set_layouts)
            .push_constant_ranges(info.push_constant_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| VulkanError::resource("pipeline layout", e))?
        };

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(info.render_pass)
            .subpass(info.subpass);

        if info.dynamic_viewport_scissor {
            pipeline_info = pipeline_info.dynamic_state(&dynamic_state);
        }

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::resource("graphics pipeline", e));
            }
        };

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
