use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::pipeline_ctx::Pipeline;
use crate::renderer::contexts::pipeline_ctx::builder::{
    ComputePipelineBuilder, GraphicsPipelineBuilder, VertexInputDescription,
};
use crate::renderer::contexts::pipeline_ctx::key::{
    ComputePipelineKey, PipelineKey, SpecializationConstants,
};

/// Inputs for a graphics pipeline that are not part of its key. They must be fully
/// determined by the key's shader id, and the constants by its `constant_hash`.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub vertex_constants: SpecializationConstants,
    pub fragment_constants: SpecializationConstants,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub vertex_input: VertexInputDescription,
    pub render_pass: vk::RenderPass,
}

#[derive(Debug, Clone, Default)]
pub struct ComputePipelineDesc {
    pub shader: vk::ShaderModule,
    pub constants: SpecializationConstants,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

/// Creates and destroys the pipelines held by the pipeline caches.
pub trait PipelineFactory: Send + Sync {
    fn create_graphics_pipeline(&self, key: &PipelineKey, desc: &GraphicsPipelineDesc) -> Result<Pipeline>;
    fn create_compute_pipeline(&self, key: &ComputePipelineKey, desc: &ComputePipelineDesc) -> Result<Pipeline>;
    fn destroy_pipeline(&self, pipeline: Pipeline);
}

pub struct VulkanPipelineFactory {
    device: Arc<ash::Device>,
}

impl VulkanPipelineFactory {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self { device }
    }

    fn create_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        Ok(unsafe {
            self.device.create_pipeline_layout(&layout_info, None)?
        })
    }
}

impl PipelineFactory for VulkanPipelineFactory {
    fn create_graphics_pipeline(&self, key: &PipelineKey, desc: &GraphicsPipelineDesc) -> Result<Pipeline> {
        let layout = self.create_layout(&desc.set_layouts, &desc.push_constant_ranges)?;

        let pipeline = GraphicsPipelineBuilder::new(self.device.clone())
            .with_shader_modules(desc.vertex_shader, desc.fragment_shader)
            .with_specialization(desc.vertex_constants.clone(), desc.fragment_constants.clone())
            .with_pipeline_layout(layout)
            .with_vertex_input(desc.vertex_input.clone())
            .with_input_topology(key.draw_mode.topology())
            .with_polygon_mode(key.polygon_mode.to_vk())
            .with_cull_mode(key.cull_mode.to_vk(), key.winding_order.front_face())
            .with_multisampling(key.sample_count, key.sample_shading)
            .with_blend_mode(key.blend_mode)
            .with_depth_mode(key.depth_mode.resolve(key.blend_mode))
            .with_color_attachment_format(key.color_format)
            .with_depth_attachment_format(key.depth_format)
            .with_render_pass(desc.render_pass)
            .build();

        match pipeline {
            Ok(pipeline) => Ok(Pipeline { pipeline, layout }),
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    fn create_compute_pipeline(&self, _key: &ComputePipelineKey, desc: &ComputePipelineDesc) -> Result<Pipeline> {
        let layout = self.create_layout(&desc.set_layouts, &desc.push_constant_ranges)?;

        let pipeline = ComputePipelineBuilder::new(self.device.clone())
            .with_shader_module(desc.shader)
            .with_specialization(desc.constants.clone())
            .with_pipeline_layout(layout)
            .build();

        match pipeline {
            Ok(pipeline) => Ok(Pipeline { pipeline, layout }),
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                Err(e)
            }
        }
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.pipeline, None);
            self.device.destroy_pipeline_layout(pipeline.layout, None);
        }
    }
}
