use std::ffi::CString;
use std::mem;
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

use crate::renderer::shader_data::{QuadVertex, MAX_TEXTURE_SLOTS};

const SHADERS_DIR: &str = "shaders-built";

/// Graphics pipeline for textured quad batches, along with the descriptor
/// set layout its frame sets are allocated against.
///
/// Viewport and scissor are dynamic state, so window resizes never require
/// rebuilding the pipeline.
pub struct QuadPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub set_layout: vk::DescriptorSetLayout,
    device: Arc<ash::Device>,
}

impl QuadPipeline {
    pub fn new(
        color_attachment_format: vk::Format,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let set_layout = Self::create_set_layout(&device)?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts);
        let pipeline_layout = unsafe {
            device.create_pipeline_layout(&layout_info, None)?
        };

        let pipeline = Self::create_pipeline(
            color_attachment_format,
            pipeline_layout,
            &device,
        )?;

        Ok(Self {
            pipeline,
            pipeline_layout,
            set_layout,
            device,
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer, descriptor_set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
        }
    }

    /// Binding 0 holds the per-frame uniforms, binding 1 the texture slot
    /// array sampled by the fragment shader.
    fn create_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_TEXTURE_SLOTS as u32)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings);
        Ok(unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        })
    }

    fn vertex_input_description() -> (
        [vk::VertexInputBindingDescription; 1],
        [vk::VertexInputAttributeDescription; 4],
    ) {
        let bindings = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(mem::size_of::<QuadVertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attributes = [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(mem::offset_of!(QuadVertex, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(mem::offset_of!(QuadVertex, color) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(mem::offset_of!(QuadVertex, texcoord) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(3)
                .format(vk::Format::R32_UINT)
                .offset(mem::offset_of!(QuadVertex, slot) as u32),
        ];
        (bindings, attributes)
    }

    fn create_pipeline(
        color_attachment_format: vk::Format,
        pipeline_layout: vk::PipelineLayout,
        device: &Arc<ash::Device>,
    ) -> Result<vk::Pipeline> {
        let shader = GraphicsShader::new("quad", device.clone())?;
        let shader_main_fn_name = CString::new("main")?;
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader.vert_mod)
                .name(&shader_main_fn_name),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader.frag_mod)
                .name(&shader_main_fn_name),
        ];

        let (bindings, attributes) = Self::vertex_input_description();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        // Alpha blending, with transparent quads expected to be submitted
        // after the opaque ones
        let color_blend_attachment =
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD);
        let color_blend_attachments = [color_blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);

        // Flat 2D layers, no depth buffer
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::ALWAYS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states =
            [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let color_attachment_formats = [color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_attachment_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&shader_stages)
            .layout(pipeline_layout)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipeline = unsafe {
            match device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => Ok(pipelines),
                Err(_) => Err(eyre!("Failed to create quad graphics pipeline")),
            }
        }?[0];

        Ok(pipeline)
    }
}

impl Drop for QuadPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

struct GraphicsShader {
    vert_mod: vk::ShaderModule,
    frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    fn new(shader_name: &str, device: Arc<ash::Device>) -> Result<Self> {
        let vert_mod = create_shader_module(
            (&format!("{}/{}.vert.spv", SHADERS_DIR, shader_name)).as_ref(),
            &device,
        )?;
        let frag_mod = create_shader_module(
            (&format!("{}/{}.frag.spv", SHADERS_DIR, shader_name)).as_ref(),
            &device,
        )?;
        Ok(Self {
            vert_mod,
            frag_mod,
            device,
        })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

fn create_shader_module(
    filepath: &Path,
    device: &ash::Device,
) -> Result<vk::ShaderModule> {
    let code = std::fs::read(filepath)?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(bytemuck::cast_slice(&code));

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)?
    };

    Ok(shader_module)
}
