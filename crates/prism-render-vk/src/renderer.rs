// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Context, Result};
use ash::vk;
use prism_render::geometry::CombinedLayout;
use prism_render::settings::DepthMode;
use prism_render::uniforms::UniformBufferObject;
use prism_render::{
    AcquireOutcome, FrameOps, FrameOutcome, FrameSynchronizer, PresentOutcome, RenderSettings,
    RenderSize, Renderer, WindowHost, FRAMES_IN_FLIGHT,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::{upload_via_staging, Buffer};
use crate::commands::{record_frame, CommandPool, FrameRecording};
use crate::device::DeviceContext;
use crate::error::{VkError, VkResultExt};
use crate::frame::{
    create_slot_resources, rebuild_slots, DescriptorPool, SlotResources, SlotSync,
};
use crate::instance::InstanceContext;
use crate::pipeline::{
    DescriptorSetLayout, GraphicsPipeline, PipelineDesc, RenderPass, ShaderCode,
};
use crate::surface::Surface;
use crate::swapchain::Swapchain;

/// Every GPU object the renderer owns.
///
/// STRICT TEARDOWN ORDER (fields drop top to bottom):
/// - slot sync and per-slot buffers before the pools they came from
/// - pipeline and layouts before the render pass
/// - framebuffers/views/swapchain before the render pass and the surface
/// - the device and instance go last, once every `Arc` holder is gone
struct GpuState {
    sync: Vec<SlotSync>,
    slots: Vec<SlotResources>,
    _descriptors: DescriptorPool,
    geometry: Buffer,
    pipeline: GraphicsPipeline,
    _set_layout: DescriptorSetLayout,
    swapchain: Swapchain,
    render_pass: RenderPass,
    _commands: CommandPool,
    surface: Surface,
    device: Arc<DeviceContext>,

    layout: CombinedLayout,
    clear_color: [f32; 4],
    depth: bool,
    started: Instant,
}

impl GpuState {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        // STRICT ORDER: instance -> surface -> device (scored against this
        // surface) -> swapchain -> render pass -> pipeline -> buffers -> sync.
        let dh = display
            .display_handle()
            .map_err(|e| VkError::WindowHandle(e.to_string()))?
            .as_raw();

        let instance = Arc::new(
            InstanceContext::new(Some(dh), settings.validation).context("create_instance")?,
        );
        let surface =
            Surface::new(Arc::clone(&instance), window, display).context("create_surface")?;
        let device = Arc::new(
            DeviceContext::new(instance, Some(&surface), settings.require_geometry_shader)
                .context("select adapter / create device")?,
        );

        let depth_format = match settings.depth {
            DepthMode::Off => None,
            DepthMode::Less => Some(
                device
                    .pick_depth_format()
                    .context("no depth format usable as an attachment")?,
            ),
        };

        // --- Swapchain, render pass, framebuffers ---
        let mut swapchain = Swapchain::new(
            &device,
            &surface,
            size,
            settings.present_mode,
            depth_format,
        )
        .context("create swapchain")?;
        let render_pass = RenderPass::new(&device, swapchain.format(), depth_format)
            .context("create render pass")?;
        swapchain
            .attach_framebuffers(render_pass.handle())
            .context("create framebuffers")?;

        // --- Pipeline ---
        let set_layout =
            DescriptorSetLayout::uniform_vertex(&device).context("descriptor set layout")?;
        let shaders = ShaderCode::load(settings.shader_dir.as_deref()).context("load shaders")?;
        let pipeline = GraphicsPipeline::new(
            &device,
            &PipelineDesc {
                render_pass: render_pass.handle(),
                set_layout: set_layout.handle(),
                shaders: &shaders,
                front_face: settings.front_face,
                depth: settings.depth,
            },
        )
        .context("create graphics pipeline")?;

        // --- Geometry: vertices then indices in one device-local buffer ---
        let commands = CommandPool::new(&device).context("create command pool")?;
        let mesh = settings.mesh.mesh();
        let layout = CombinedLayout::of(&mesh);
        let geometry = upload_via_staging(
            &device,
            &commands,
            &mesh.pack_combined(),
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .context("upload geometry")?;
        info!(
            mesh = ?settings.mesh,
            vertex_bytes = layout.vertex_bytes,
            index_bytes = layout.index_bytes,
            "geometry uploaded"
        );

        // --- Frame slots ---
        let descriptors = DescriptorPool::for_uniform_sets(&device, FRAMES_IN_FLIGHT as u32)
            .context("create descriptor pool")?;
        let slots = create_slot_resources(
            &device,
            &commands,
            &descriptors,
            set_layout.handle(),
            FRAMES_IN_FLIGHT,
        )
        .context("create frame slots")?;
        let mut sync = Vec::new();
        rebuild_slots(&mut sync, FRAMES_IN_FLIGHT, |_| SlotSync::new(&device))
            .context("create sync objects")?;

        Ok(Self {
            sync,
            slots,
            _descriptors: descriptors,
            geometry,
            pipeline,
            _set_layout: set_layout,
            swapchain,
            render_pass,
            _commands: commands,
            surface,
            device,
            layout,
            clear_color: settings.clear_color_linear(),
            depth: depth_format.is_some(),
            started: Instant::now(),
        })
    }
}

impl FrameOps for GpuState {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        Ok(self.sync[slot].in_flight.wait()?)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        Ok(self
            .swapchain
            .acquire(self.sync[slot].image_available.handle())?)
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.sync[slot].in_flight.reset()?;
        unsafe {
            self.device.raw().reset_command_buffer(
                self.slots[slot].command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
        }
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let frame = FrameRecording {
            render_pass: self.render_pass.handle(),
            framebuffer: self.swapchain.framebuffer(image_index),
            extent: self.swapchain.extent(),
            pipeline: self.pipeline.handle(),
            pipeline_layout: self.pipeline.layout(),
            geometry: self.geometry.handle(),
            layout: self.layout,
            descriptor_set: self.slots[slot].descriptor_set,
            clear_color: self.clear_color,
            depth: self.depth,
        };
        unsafe { record_frame(self.device.raw(), self.slots[slot].command_buffer, &frame)? };
        Ok(())
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        let extent = self.swapchain.extent();
        let ubo = UniformBufferObject::spinning(
            self.started.elapsed().as_secs_f32(),
            RenderSize::new(extent.width, extent.height),
        );
        self.slots[slot].uniforms.write(&ubo)?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let sync = &self.sync[slot];
        let wait = [sync.image_available.handle()];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [sync.render_finished.handle()];
        let cmds = [self.slots[slot].command_buffer];
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: cmds.len() as u32,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .raw()
                .queue_submit(
                    self.device.graphics_queue(),
                    std::slice::from_ref(&info),
                    sync.in_flight.handle(),
                )
                .during("vkQueueSubmit")?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        Ok(self.swapchain.present(
            self.device.present_queue(),
            image_index,
            self.sync[slot].render_finished.handle(),
        )?)
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        self.device.wait_idle()?;
        self.swapchain.release();
        self.sync.clear();
        self.swapchain
            .rebuild(&self.surface, size, self.render_pass.handle())
            .context("recreate swapchain")?;
        rebuild_slots(&mut self.sync, FRAMES_IN_FLIGHT, |_| {
            SlotSync::new(&self.device)
        })
        .context("recreate sync objects")?;
        info!(
            width = self.swapchain.extent().width,
            height = self.swapchain.extent().height,
            images = self.swapchain.image_count(),
            views = self.swapchain.view_count(),
            framebuffers = self.swapchain.framebuffer_count(),
            "swapchain recreated"
        );
        Ok(())
    }
}

/// Vulkan implementation of [`Renderer`].
pub struct VkRenderer {
    gpu: Option<GpuState>,
    frames: FrameSynchronizer,
    resize_requested: bool,
}

impl Renderer for VkRenderer {
    fn init(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let gpu = GpuState::new(window, display, size, settings)?;
        info!(adapter = gpu.device.name(), "Vulkan renderer ready");
        Ok(Self {
            gpu: Some(gpu),
            frames: FrameSynchronizer::new(),
            resize_requested: false,
        })
    }

    fn draw(&mut self, host: &mut dyn WindowHost) -> Result<FrameOutcome> {
        let Some(gpu) = self.gpu.as_mut() else {
            bail!("draw called after cleanup");
        };
        self.frames.draw(gpu, host, &mut self.resize_requested)
    }

    fn cleanup(&mut self) {
        let Some(gpu) = self.gpu.take() else {
            return;
        };
        if let Err(e) = gpu.device.wait_idle() {
            warn!("device idle before cleanup failed: {e}");
        }
        debug!(recreations = self.frames.recreations(), "releasing GPU objects");
        drop(gpu);
        info!("Vulkan renderer cleaned up");
    }

    fn signal_resize(&mut self) {
        self.resize_requested = true;
    }

    fn resize_pending(&self) -> bool {
        self.resize_requested
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
