// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor layout, shader modules and the fixed graphics
//! pipeline. All built once at init.

use ash::util::read_spv;
use ash::vk;
use prism_render::assets::read_binary;
use prism_render::geometry::Vertex;
use prism_render::settings::{DepthMode, Winding};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{Result, VkError};

pub const SHADER_ENTRY: &CStr = c"main";
pub const VERTEX_SHADER: &str = "cube.vert.spv";
pub const FRAGMENT_SHADER: &str = "cube.frag.spv";

pub struct RenderPass {
    handle: vk::RenderPass,
    device: Arc<DeviceContext>,
}

impl RenderPass {
    /// One colour attachment presented at the end, optional depth cleared
    /// to 1.0, a single subpass.
    pub fn new(
        device: &Arc<DeviceContext>,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<Self> {
        let mut attachments = vec![vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        if let Some(format) = depth_format {
            attachments.push(vk::AttachmentDescription {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: if depth_format.is_some() {
                &depth_ref
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let dependency = external_dependency(depth_format.is_some());

        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_render_pass(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.handle, None) };
    }
}

/// EXTERNAL -> 0: colour writes wait for the acquire, and depth writes for
/// the previous frame's depth tests.
pub fn external_dependency(depth: bool) -> vk::SubpassDependency {
    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: stages,
        dst_access_mask: access,
        ..Default::default()
    }
}

/// Binding 0: one uniform buffer for the vertex stage.
pub struct DescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    device: Arc<DeviceContext>,
}

impl DescriptorSetLayout {
    pub fn uniform_vertex(device: &Arc<DeviceContext>) -> Result<Self> {
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        };
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_descriptor_set_layout(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_descriptor_set_layout(self.handle, None)
        };
    }
}

/// SPIR-V words for both stages.
pub struct ShaderCode {
    pub vert: Vec<u32>,
    pub frag: Vec<u32>,
}

impl ShaderCode {
    pub fn from_bytes(vert: &[u8], frag: &[u8]) -> Result<Self> {
        let words = |bytes: &[u8], stage: &str| {
            read_spv(&mut Cursor::new(bytes))
                .map_err(|e| VkError::Shader(format!("{stage} stage is not SPIR-V: {e}")))
        };
        Ok(Self {
            vert: words(vert, "vertex")?,
            frag: words(frag, "fragment")?,
        })
    }

    /// `cube.vert.spv` and `cube.frag.spv` from `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let load = |name: &str| {
            read_binary(&dir.join(name)).map_err(|e| VkError::Shader(format!("{e:#}")))
        };
        Self::from_bytes(&load(VERTEX_SHADER)?, &load(FRAGMENT_SHADER)?)
    }

    /// The configured directory, else the build-time shaders when embedded,
    /// else `./shaders`.
    pub fn load(shader_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = shader_dir {
            return Self::from_dir(dir);
        }
        #[cfg(feature = "embed-shaders")]
        {
            Self::from_bytes(
                include_bytes!(concat!(env!("OUT_DIR"), "/cube.vert.spv")),
                include_bytes!(concat!(env!("OUT_DIR"), "/cube.frag.spv")),
            )
        }
        #[cfg(not(feature = "embed-shaders"))]
        {
            Self::from_dir(Path::new("shaders"))
        }
    }
}

struct ShaderModule {
    handle: vk::ShaderModule,
    device: Arc<DeviceContext>,
}

impl ShaderModule {
    fn new(device: &Arc<DeviceContext>, code: &[u32]) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_shader_module(&info, None)? };
        Ok(Self {
            handle,
            device: Arc::clone(device),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
    }
}

pub fn vertex_input_layout() -> (
    vk::VertexInputBindingDescription,
    [vk::VertexInputAttributeDescription; 2],
) {
    (
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: Vertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::POS_OFFSET,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::COLOR_OFFSET,
            },
        ],
    )
}

pub fn front_face(winding: Winding) -> vk::FrontFace {
    match winding {
        Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        Winding::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub fn depth_state<'a>(mode: DepthMode) -> vk::PipelineDepthStencilStateCreateInfo<'a> {
    let on = match mode {
        DepthMode::Off => vk::FALSE,
        DepthMode::Less => vk::TRUE,
    };
    vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: on,
        depth_write_enable: on,
        depth_compare_op: vk::CompareOp::LESS,
        ..Default::default()
    }
}

pub struct PipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub set_layout: vk::DescriptorSetLayout,
    pub shaders: &'a ShaderCode,
    pub front_face: Winding,
    pub depth: DepthMode,
}

pub struct GraphicsPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: Arc<DeviceContext>,
}

impl GraphicsPipeline {
    pub fn new(device: &Arc<DeviceContext>, desc: &PipelineDesc<'_>) -> Result<Self> {
        let raw = device.raw();

        // Modules only need to outlive pipeline creation.
        let vs = ShaderModule::new(device, &desc.shaders.vert)?;
        let fs = ShaderModule::new(device, &desc.shaders.frag)?;
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.handle,
                p_name: SHADER_ENTRY.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.handle,
                p_name: SHADER_ENTRY.as_ptr(),
                ..Default::default()
            },
        ];

        let (binding, attributes) = vertex_input_layout();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // viewport and scissor are dynamic, so resizes never touch the pipeline
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: front_face(desc.front_face),
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = depth_state(desc.depth);
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &desc.set_layout,
            ..Default::default()
        };
        let layout = unsafe { raw.create_pipeline_layout(&layout_info, None)? };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };
        let pipeline = match unsafe {
            raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        } {
            Ok(p) => p[0],
            Err((_, err)) => {
                unsafe { raw.destroy_pipeline_layout(layout, None) };
                return Err(err.into());
            }
        };

        info!(
            front_face = ?desc.front_face,
            depth = ?desc.depth,
            "graphics pipeline built"
        );
        Ok(Self {
            pipeline,
            layout,
            device: Arc::clone(device),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            raw.destroy_pipeline(self.pipeline, None);
            raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_interleaved_vec3_pair() {
        let (binding, attrs) = vertex_input_layout();
        assert_eq!(binding.stride, 24);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
        assert!(attrs
            .iter()
            .all(|a| a.format == vk::Format::R32G32B32_SFLOAT && a.binding == 0));
    }

    #[test]
    fn winding_maps_to_front_face() {
        assert_eq!(
            front_face(Winding::CounterClockwise),
            vk::FrontFace::COUNTER_CLOCKWISE
        );
        assert_eq!(front_face(Winding::Clockwise), vk::FrontFace::CLOCKWISE);
    }

    #[test]
    fn depth_uses_less_when_enabled() {
        let off = depth_state(DepthMode::Off);
        assert_eq!(off.depth_test_enable, vk::FALSE);
        assert_eq!(off.depth_write_enable, vk::FALSE);
        let on = depth_state(DepthMode::Less);
        assert_eq!(on.depth_test_enable, vk::TRUE);
        assert_eq!(on.depth_compare_op, vk::CompareOp::LESS);
    }

    #[test]
    fn external_dependency_waits_on_colour_output() {
        let dep = external_dependency(false);
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );

        let dep = external_dependency(true);
        assert!(dep
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dep
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn non_spirv_bytes_are_rejected() {
        let err = ShaderCode::from_bytes(&[1, 2, 3], &[]).err().unwrap();
        assert!(matches!(err, VkError::Shader(_)));
    }

    #[test]
    fn valid_magic_is_accepted() {
        // magic number plus four header words
        let mut blob = 0x0723_0203u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&[0u8; 16]);
        let code = ShaderCode::from_bytes(&blob, &blob).unwrap();
        assert_eq!(code.vert.len(), 5);
        assert_eq!(code.vert[0], 0x0723_0203);
    }

    #[test]
    fn missing_shader_dir_is_a_shader_error() {
        let err = ShaderCode::from_dir(Path::new("/nonexistent/prism/shaders"))
            .err()
            .unwrap();
        match err {
            VkError::Shader(msg) => assert!(msg.contains("cube.vert.spv"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "embed-shaders")]
    #[test]
    fn default_build_embeds_both_stages() {
        let code = ShaderCode::load(None).unwrap();
        assert_eq!(code.vert[0], 0x0723_0203);
        assert_eq!(code.frag[0], 0x0723_0203);
        assert!(code.vert.len() > 5 && code.frag.len() > 5);
    }

    #[test]
    fn configured_dir_wins_over_embedded() {
        let err = ShaderCode::load(Some(Path::new("/nonexistent/prism/shaders")))
            .err()
            .unwrap();
        assert!(matches!(err, VkError::Shader(_)));
    }
}
