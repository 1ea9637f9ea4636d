// SPDX-License-Identifier: CEPL-1.0
//! Command pool, one-shot submissions and the per-frame recording.

use ash::vk;
use prism_render::geometry::CombinedLayout;
use std::sync::Arc;

use crate::device::DeviceContext;
use crate::error::{Result, VkResultExt};

/// Resettable pool on the graphics family. Dropping it frees every command
/// buffer allocated from it.
pub struct CommandPool {
    handle: vk::CommandPool,
    queue: vk::Queue,
    device: Arc<DeviceContext>,
}

impl CommandPool {
    pub fn new(device: &Arc<DeviceContext>) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.families().graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_command_pool(&info, None)? };
        Ok(Self {
            handle,
            queue: device.graphics_queue(),
            device: Arc::clone(device),
        })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.handle,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        Ok(unsafe { self.device.raw().allocate_command_buffers(&info)? })
    }

    /// allocate -> begin -> `record` -> end -> submit -> queue idle -> free.
    pub fn one_shot(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let raw = self.device.raw();
        let cmds = self.allocate(1)?;
        let result = unsafe { self.submit_and_wait(raw, cmds[0], record) };
        unsafe { raw.free_command_buffers(self.handle, &cmds) };
        result
    }

    unsafe fn submit_and_wait(
        &self,
        raw: &ash::Device,
        cmd: vk::CommandBuffer,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        raw.begin_command_buffer(cmd, &begin)?;
        record(raw, cmd);
        raw.end_command_buffer(cmd)?;

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        raw.queue_submit(self.queue, std::slice::from_ref(&submit), vk::Fence::null())
            .during("vkQueueSubmit (one-shot)")?;
        raw.queue_wait_idle(self.queue).during("vkQueueWaitIdle")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_command_pool(self.handle, None) };
    }
}

/// Everything one frame's command buffer refers to.
pub struct FrameRecording {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub geometry: vk::Buffer,
    pub layout: CombinedLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
    pub depth: bool,
}

pub fn clear_values(color: [f32; 4], depth: bool) -> Vec<vk::ClearValue> {
    let mut values = vec![vk::ClearValue {
        color: vk::ClearColorValue { float32: color },
    }];
    if depth {
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    values
}

pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    (
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    )
}

/// Single pass, single indexed draw of the whole index range.
pub unsafe fn record_frame(
    raw: &ash::Device,
    cmd: vk::CommandBuffer,
    frame: &FrameRecording,
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    raw.begin_command_buffer(cmd, &begin)?;

    let clears = clear_values(frame.clear_color, frame.depth);
    let (viewport, scissor) = full_viewport(frame.extent);
    let pass = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: frame.render_pass,
        framebuffer: frame.framebuffer,
        render_area: scissor,
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    raw.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
    raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, frame.pipeline);
    raw.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
    raw.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

    // vertices at 0, indices right after them in the same buffer
    raw.cmd_bind_vertex_buffers(cmd, 0, &[frame.geometry], &[0]);
    raw.cmd_bind_index_buffer(
        cmd,
        frame.geometry,
        frame.layout.index_offset,
        vk::IndexType::UINT16,
    );
    raw.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        frame.pipeline_layout,
        0,
        &[frame.descriptor_set],
        &[],
    );
    raw.cmd_draw_indexed(cmd, frame.layout.index_count, 1, 0, 0, 0);

    raw.cmd_end_render_pass(cmd);
    raw.end_command_buffer(cmd)?;
    Ok(())
}
