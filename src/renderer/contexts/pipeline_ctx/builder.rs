use std::ffi::CString;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt};
use crate::renderer::contexts::pipeline_ctx::key::{BlendMode, DepthMode, SpecializationConstants};

#[derive(Debug, Clone, Default)]
pub struct VertexInputDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub flags: vk::PipelineVertexInputStateCreateFlags,
}

pub struct GraphicsPipelineBuilder {
    device: Arc<ash::Device>,

    vertex_input: VertexInputDescription,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    sample_count: vk::SampleCountFlags,
    sample_shading: bool,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    color_attachment_format: vk::Format,
    depth_attachment_format: vk::Format,
    render_pass: vk::RenderPass,
    shader_modules: Option<(vk::ShaderModule, vk::ShaderModule)>,
    vertex_constants: SpecializationConstants,
    fragment_constants: SpecializationConstants,
    pipeline_layout: Option<vk::PipelineLayout>,
}

impl GraphicsPipelineBuilder {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,

            vertex_input: VertexInputDescription::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            sample_count: vk::SampleCountFlags::TYPE_1,
            sample_shading: false,
            color_blend_attachment: vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false),
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            color_attachment_format: vk::Format::UNDEFINED,
            depth_attachment_format: vk::Format::UNDEFINED,
            render_pass: vk::RenderPass::null(),
            shader_modules: None,
            vertex_constants: SpecializationConstants::default(),
            fragment_constants: SpecializationConstants::default(),
            pipeline_layout: None,
        }
    }

    pub fn with_shader_modules(mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        let _ = self.shader_modules.replace((vertex, fragment));
        self
    }

    pub fn with_specialization(
        mut self,
        vertex: SpecializationConstants,
        fragment: SpecializationConstants,
    ) -> Self {
        self.vertex_constants = vertex;
        self.fragment_constants = fragment;
        self
    }

    pub fn with_pipeline_layout(mut self, layout: vk::PipelineLayout) -> Self {
        let _ = self.pipeline_layout.replace(layout);
        self
    }

    pub fn with_vertex_input(mut self, description: VertexInputDescription) -> Self {
        self.vertex_input = description;
        self
    }

    pub fn with_input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn with_cull_mode(
        mut self,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn with_multisampling(mut self, samples: vk::SampleCountFlags, sample_shading: bool) -> Self {
        self.sample_count = samples;
        self.sample_shading = sample_shading;
        self
    }

    pub fn with_blend_mode(self, blend_mode: BlendMode) -> Self {
        match blend_mode {
            BlendMode::Opaque => self.with_blending_disabled(),
            BlendMode::AlphaBlend => self.with_alpha_blending_enabled(),
            BlendMode::Additive => self.with_additive_blending_enabled(),
        }
    }

    pub fn with_blending_disabled(mut self) -> Self {
        self.color_blend_attachment.color_write_mask = vk::ColorComponentFlags::RGBA;
        self.color_blend_attachment.blend_enable = vk::FALSE;
        self
    }

    // Make sure the transparent object is rendered AFTER the opaque ones
    pub fn with_alpha_blending_enabled(mut self) -> Self {
        let blend = &mut self.color_blend_attachment;
        blend.color_write_mask = vk::ColorComponentFlags::RGBA;
        blend.blend_enable = vk::TRUE;
        blend.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
        blend.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
        blend.color_blend_op = vk::BlendOp::ADD;
        blend.src_alpha_blend_factor = vk::BlendFactor::ONE;
        blend.dst_alpha_blend_factor = vk::BlendFactor::ZERO;
        blend.alpha_blend_op = vk::BlendOp::ADD;
        self
    }

    pub fn with_additive_blending_enabled(mut self) -> Self {
        let blend = &mut self.color_blend_attachment;
        blend.color_write_mask = vk::ColorComponentFlags::RGBA;
        blend.blend_enable = vk::TRUE;
        blend.src_color_blend_factor = vk::BlendFactor::ONE;
        blend.dst_color_blend_factor = vk::BlendFactor::ONE;
        blend.color_blend_op = vk::BlendOp::ADD;
        blend.src_alpha_blend_factor = vk::BlendFactor::ONE;
        blend.dst_alpha_blend_factor = vk::BlendFactor::ZERO;
        blend.alpha_blend_op = vk::BlendOp::ADD;
        self
    }

    pub fn with_depth_mode(mut self, depth_mode: DepthMode) -> Self {
        let (test, write, compare) = depth_mode.depth_state();
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    pub fn with_color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = format;
        self
    }

    pub fn with_depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.depth_attachment_format = format;
        self
    }

    /// Targets a classic render pass. Without one the pipeline uses dynamic rendering.
    pub fn with_render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = render_pass;
        self
    }

    pub fn build(mut self) -> Result<vk::Pipeline> {
        let (vertex_module, fragment_module) = self
            .shader_modules
            .take()
            .ok_or_eyre("No shader provided for GraphicsPipelineBuilder")?;
        let pipeline_layout = self.pipeline_layout.take().ok_or_eyre(
            "No pipeline layout provided for GraphicsPipelineBuilder",
        )?;

        let shader_main_fn_name = CString::new("main")?;
        let vertex_entries = self.vertex_constants.map_entries();
        let vertex_data = self.vertex_constants.data();
        let vertex_specialization = vk::SpecializationInfo::default()
            .map_entries(&vertex_entries)
            .data(&vertex_data);
        let fragment_entries = self.fragment_constants.map_entries();
        let fragment_data = self.fragment_constants.data();
        let fragment_specialization = vk::SpecializationInfo::default()
            .map_entries(&fragment_entries)
            .data(&fragment_data);

        let mut vertex_stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&shader_main_fn_name);
        if !self.vertex_constants.is_empty() {
            vertex_stage = vertex_stage.specialization_info(&vertex_specialization);
        }
        let mut fragment_stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(&shader_main_fn_name);
        if !self.fragment_constants.is_empty() {
            fragment_stage = fragment_stage.specialization_info(&fragment_specialization);
        }
        let shader_stages = [vertex_stage, fragment_stage];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_attribute_descriptions(&self.vertex_input.attributes)
            .vertex_binding_descriptions(&self.vertex_input.bindings)
            .flags(self.vertex_input.flags);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.sample_count)
            .sample_shading_enable(self.sample_shading)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false);

        // Depth-only targets have no color attachment to blend into
        let depth_only = self.color_attachment_format == vk::Format::UNDEFINED;
        let color_attachments: &[vk::PipelineColorBlendAttachmentState] = if depth_only {
            &[]
        } else {
            std::slice::from_ref(&self.color_blend_attachment)
        };
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_attachments);

        // Use dynamic state for viewport and scissor configuration
        let dynamic_states =
            [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let color_formats = [self.color_attachment_format];
        let color_formats: &[vk::Format] = if depth_only { &[] } else { &color_formats };
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(color_formats)
            .depth_attachment_format(self.depth_attachment_format);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(pipeline_layout)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_info)
            .render_pass(self.render_pass);
        if self.render_pass == vk::RenderPass::null() {
            pipeline_info = pipeline_info.push_next(&mut rendering_info);
        }

        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }.map_err(|(_, e)| eyre!("Failed to create graphics pipeline: {}", e))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_eyre("Driver returned no graphics pipeline")
    }
}

pub struct ComputePipelineBuilder {
    device: Arc<ash::Device>,
    shader_module: Option<vk::ShaderModule>,
    constants: SpecializationConstants,
    pipeline_layout: Option<vk::PipelineLayout>,
}

impl ComputePipelineBuilder {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,
            shader_module: None,
            constants: SpecializationConstants::default(),
            pipeline_layout: None,
        }
    }

    pub fn with_shader_module(mut self, module: vk::ShaderModule) -> Self {
        let _ = self.shader_module.replace(module);
        self
    }

    pub fn with_specialization(mut self, constants: SpecializationConstants) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_pipeline_layout(mut self, layout: vk::PipelineLayout) -> Self {
        let _ = self.pipeline_layout.replace(layout);
        self
    }

    pub fn build(mut self) -> Result<vk::Pipeline> {
        let shader_module = self
            .shader_module
            .take()
            .ok_or_eyre("No shader provided for ComputePipelineBuilder")?;
        let pipeline_layout = self.pipeline_layout.take().ok_or_eyre(
            "No pipeline layout provided for ComputePipelineBuilder",
        )?;

        let name = CString::new("main")?;
        let entries = self.constants.map_entries();
        let data = self.constants.data();
        let specialization = vk::SpecializationInfo::default()
            .map_entries(&entries)
            .data(&data);
        let mut stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(&name);
        if !self.constants.is_empty() {
            stage_info = stage_info.specialization_info(&specialization);
        }

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .layout(pipeline_layout)
            .stage(stage_info);
        let pipelines = unsafe {
            self.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }.map_err(|(_, e)| eyre!("Failed to create compute pipeline: {}", e))?;

        pipelines
            .into_iter()
            .next()
            .ok_or_eyre("Driver returned no compute pipeline")
    }
}
