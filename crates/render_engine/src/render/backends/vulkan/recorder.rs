//! Per-swapchain-image command buffer recording
//!
//! One primary command buffer per swapchain image, re-recorded as a whole
//! whenever anything that affects recorded state changes (object set,
//! visibility, clear color, pipelines, swapchain). Transform updates go
//! through the dynamic uniform buffer and never force a re-record.
//!
//! `check_command_buffers` guards the invariant that the buffer count
//! matches the swapchain image count; a mismatch is never patched in place,
//! the buffers are destroyed and recreated.

use ash::vk::Handle;
use ash::{vk, Device};

use crate::render::backends::vulkan::commands::{CommandPool, CommandRecorder};
use crate::render::backends::vulkan::VulkanResult;

/// Everything needed to record one draw
#[derive(Debug, Clone, Copy)]
pub struct DrawCommand {
    /// Pipeline to bind
    pub pipeline: vk::Pipeline,
    /// Layout for descriptor binding
    pub pipeline_layout: vk::PipelineLayout,
    /// The object's descriptor set
    pub descriptor_set: vk::DescriptorSet,
    /// Material's layout group, primary sort key
    pub layout_index: usize,
    /// Dynamic uniform offset (object slot × stride)
    pub dynamic_offset: u32,
    /// Byte offset into the shared vertex buffer
    pub vertex_offset: vk::DeviceSize,
    /// Vertex count for non-indexed draws
    pub vertex_count: u32,
    /// Byte offset into the shared index buffer
    pub index_offset: vk::DeviceSize,
    /// Index count; zero when non-indexed
    pub index_count: u32,
}

impl DrawCommand {
    /// Whether the draw is indexed
    pub fn indexed(&self) -> bool {
        self.index_count > 0
    }
}

/// Order draws so consecutive ones share a layout and pipeline where
/// possible, minimizing rebinds.
pub fn sort_draws(draws: &mut [DrawCommand]) {
    draws.sort_by_key(|draw| (draw.layout_index, draw.pipeline.as_raw()));
}

/// A recorded buffer set is only usable when it is non-empty and exactly one
/// buffer exists per swapchain image.
pub fn buffers_match(buffer_count: usize, image_count: usize) -> bool {
    buffer_count != 0 && buffer_count == image_count
}

/// Recording inputs for one full pass over all swapchain images
pub struct RecordInputs<'a> {
    /// Render pass to begin
    pub render_pass: vk::RenderPass,
    /// One framebuffer per swapchain image
    pub framebuffers: &'a [vk::Framebuffer],
    /// Current swapchain extent
    pub extent: vk::Extent2D,
    /// Clear color (RGBA)
    pub clear_color: [f32; 4],
    /// Draws, already sorted
    pub draws: &'a [DrawCommand],
    /// Shared vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// Shared index buffer
    pub index_buffer: vk::Buffer,
}

/// Owns the per-image command buffers and their dirty state
pub struct CommandBufferRecorder {
    device: Device,
    pool: CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    dirty: bool,
}

impl CommandBufferRecorder {
    /// Create the recorder and its command pool
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index)?;
        Ok(Self {
            device,
            pool,
            buffers: Vec::new(),
            dirty: true,
        })
    }

    /// Force a full re-record on next use
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a re-record is pending
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Validate that the recorded buffer count matches the swapchain
    pub fn check_command_buffers(&self, image_count: usize) -> bool {
        buffers_match(self.buffers.len(), image_count)
    }

    /// Destroy and recreate the command buffers to match `image_count`.
    ///
    /// No partial patching: any mismatch frees the whole set.
    pub fn ensure_command_buffers(&mut self, image_count: usize) -> VulkanResult<()> {
        if self.check_command_buffers(image_count) {
            return Ok(());
        }
        self.destroy_command_buffers();
        self.buffers = self.pool.allocate_command_buffers(image_count as u32)?;
        self.dirty = true;
        log::debug!("Allocated {} command buffers", image_count);
        Ok(())
    }

    /// Free all command buffers; next use must recreate them
    pub fn destroy_command_buffers(&mut self) {
        self.pool.free_command_buffers(&self.buffers);
        self.buffers.clear();
        self.dirty = true;
    }

    /// Command buffer for a swapchain image
    pub fn buffer(&self, image_index: usize) -> vk::CommandBuffer {
        self.buffers[image_index]
    }

    /// Command pool backing the recorder
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }

    /// Re-record every per-image command buffer.
    ///
    /// The caller must guarantee no recorded buffer is still executing
    /// (device idle); begin() implicitly resets each buffer.
    pub fn record_all(&mut self, inputs: &RecordInputs<'_>) -> VulkanResult<()> {
        debug_assert_eq!(self.buffers.len(), inputs.framebuffers.len());

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: inputs.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: inputs.extent,
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: inputs.extent.width as f32,
            height: inputs.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        for (image_index, &command_buffer) in self.buffers.iter().enumerate() {
            let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
            recorder.begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;

            {
                let mut pass = recorder.begin_render_pass(
                    inputs.render_pass,
                    inputs.framebuffers[image_index],
                    render_area,
                    &clear_values,
                )?;

                pass.set_viewport(&viewport);
                pass.set_scissor(&render_area);

                let mut bound_pipeline = vk::Pipeline::null();

                for draw in inputs.draws {
                    if draw.pipeline != bound_pipeline {
                        pass.bind_pipeline(draw.pipeline);
                        bound_pipeline = draw.pipeline;
                    }

                    // Shared buffers bound at the object's stored byte offset,
                    // so indices and vertices stay zero-based per object
                    pass.bind_vertex_buffers(&[inputs.vertex_buffer], &[draw.vertex_offset]);

                    pass.bind_descriptor_set(
                        draw.pipeline_layout,
                        draw.descriptor_set,
                        &[draw.dynamic_offset],
                    );

                    if draw.indexed() {
                        pass.bind_index_buffer(inputs.index_buffer, draw.index_offset);
                        pass.draw_indexed(draw.index_count, 0, 0);
                    } else {
                        pass.draw(draw.vertex_count, 0);
                    }
                }
            }

            recorder.end()?;
        }

        self.dirty = false;
        log::debug!(
            "Recorded {} draws into {} command buffers",
            inputs.draws.len(),
            self.buffers.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(layout_index: usize, pipeline_raw: u64) -> DrawCommand {
        DrawCommand {
            pipeline: vk::Pipeline::from_raw(pipeline_raw),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            layout_index,
            dynamic_offset: 0,
            vertex_offset: 0,
            vertex_count: 3,
            index_offset: 0,
            index_count: 0,
        }
    }

    #[test]
    fn draws_group_by_layout_then_pipeline() {
        let mut draws = vec![
            draw(1, 30),
            draw(0, 20),
            draw(1, 10),
            draw(0, 20),
            draw(0, 10),
        ];
        sort_draws(&mut draws);

        let keys: Vec<(usize, u64)> = draws
            .iter()
            .map(|d| (d.layout_index, d.pipeline.as_raw()))
            .collect();
        assert_eq!(keys, vec![(0, 10), (0, 20), (0, 20), (1, 10), (1, 30)]);
    }

    #[test]
    fn buffer_count_must_equal_image_count() {
        assert!(buffers_match(3, 3));
        assert!(!buffers_match(2, 3));
        assert!(!buffers_match(4, 3));
        // Never recorded is never a match, even against zero images
        assert!(!buffers_match(0, 0));
        assert!(!buffers_match(0, 3));
        // A recreate to the right count restores the invariant
        assert!(buffers_match(3, 3));
    }

    #[test]
    fn indexed_flag_follows_index_count() {
        let mut d = draw(0, 1);
        assert!(!d.indexed());
        d.index_count = 36;
        assert!(d.indexed());
    }
}
