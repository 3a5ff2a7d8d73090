pub mod builder;
pub mod factory;
pub mod key;

use std::collections::HashMap;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use crate::renderer::contexts::pipeline_ctx::factory::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineFactory,
};
use crate::renderer::contexts::pipeline_ctx::key::{ComputePipelineKey, PipelineKey};

/// A pipeline together with the layout it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Responsibilities:
/// - Cache graphics and compute pipelines by key
/// - Hand cached pipelines over for deferred destruction on clear
pub struct RenderPipelineContext {
    graphics: HashMap<PipelineKey, Pipeline>,
    compute: HashMap<ComputePipelineKey, Pipeline>,
    factory: Arc<dyn PipelineFactory>,
}

impl RenderPipelineContext {
    pub fn new(factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            graphics: HashMap::new(),
            compute: HashMap::new(),
            factory,
        }
    }

    pub fn factory(&self) -> Arc<dyn PipelineFactory> {
        self.factory.clone()
    }

    /// Returns the pipeline for `key`, creating it on first use. A failed creation leaves
    /// the cache untouched.
    pub fn get_or_create(&mut self, key: &PipelineKey, desc: &GraphicsPipelineDesc) -> Result<Pipeline> {
        if let Some(pipeline) = self.graphics.get(key) {
            return Ok(*pipeline);
        }

        let pipeline = self.factory
            .create_graphics_pipeline(key, desc)
            .wrap_err_with(|| format!("Unable to create pipeline for shader {:?}", key.shader))?;
        self.graphics.insert(*key, pipeline);

        log::debug!("Created graphics pipeline {:?} ({} cached)", pipeline.pipeline, self.graphics.len());

        Ok(pipeline)
    }

    pub fn get_or_create_compute(
        &mut self,
        key: &ComputePipelineKey,
        desc: &ComputePipelineDesc,
    ) -> Result<Pipeline> {
        if let Some(pipeline) = self.compute.get(key) {
            return Ok(*pipeline);
        }

        let pipeline = self.factory
            .create_compute_pipeline(key, desc)
            .wrap_err_with(|| format!("Unable to create compute pipeline for shader {:?}", key.shader))?;
        self.compute.insert(*key, pipeline);

        log::debug!("Created compute pipeline {:?} ({} cached)", pipeline.pipeline, self.compute.len());

        Ok(pipeline)
    }

    pub fn len(&self) -> usize {
        self.graphics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphics.is_empty() && self.compute.is_empty()
    }

    pub fn compute_len(&self) -> usize {
        self.compute.len()
    }

    /// Empties both caches and returns what they held.
    pub fn take_all(&mut self) -> Vec<Pipeline> {
        self.graphics
            .drain()
            .map(|(_, pipeline)| pipeline)
            .chain(self.compute.drain().map(|(_, pipeline)| pipeline))
            .collect()
    }
}
