pub mod config;
pub mod contexts;

mod util;
#[cfg(test)]
mod testing;

use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::device_ctx::device::VulkanDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::frame_ctx::destruction::Destructor;
use crate::renderer::contexts::frame_ctx::frame::QueueSubmitOps;
use crate::renderer::contexts::frame_ctx::transfer::{ResourceId, TransferTarget};
use crate::renderer::contexts::pipeline_ctx::{Pipeline, RenderPipelineContext};
use crate::renderer::contexts::pipeline_ctx::factory::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineFactory, VulkanPipelineFactory,
};
use crate::renderer::contexts::pipeline_ctx::key::{ComputePipelineKey, PipelineKey};
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::contexts::resource_ctx::allocator::{DescriptorSetAllocator, VulkanDescriptorAllocator};
use crate::renderer::contexts::resource_ctx::descriptor_set_cache::{BindingState, DescriptorSetCache};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutDesc;
use crate::renderer::util::misuse;

/// Frame pipelining core. Owns the frame slots and every cache whose contents the GPU may
/// still be reading, and decides when each of them can be reused or destroyed.
pub struct Renderer {
    res: RenderResourceContext,
    frm: RenderFrameContext,
    pip: RenderPipelineContext,

    shut_down: bool,
}

impl Renderer {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        descriptor_allocator: Arc<Mutex<dyn DescriptorSetAllocator>>,
        pipeline_factory: Arc<dyn PipelineFactory>,
        config: RenderConfig,
    ) -> Result<Self> {
        let frm = RenderFrameContext::new(device.clone(), &config)?;
        let res = RenderResourceContext::new(device, descriptor_allocator, config.frames_in_flight);
        let pip = RenderPipelineContext::new(pipeline_factory);

        log::info!("Renderer created with {} frames in flight", config.frames_in_flight);

        Ok(Self {
            res,
            frm,
            pip,
            shut_down: false,
        })
    }

    /// Builds the Vulkan backends around an existing logical device and queue.
    pub fn new_vulkan(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        logical_device: Arc<ash::Device>,
        queue: Queue,
        config: RenderConfig,
    ) -> Result<Self> {
        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*logical_device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let device = VulkanDevice::new(logical_device.clone(), Arc::new(queue))?;
        let descriptor_allocator = VulkanDescriptorAllocator::new(
            logical_device.clone(),
            Arc::new(Mutex::new(memory_allocator)),
            config.max_update_after_bind_descriptors,
        );
        let pipeline_factory = VulkanPipelineFactory::new(logical_device);

        Self::new(
            Arc::new(device),
            Arc::new(Mutex::new(descriptor_allocator)),
            Arc::new(pipeline_factory),
            config,
        )
    }

    pub fn begin_frame(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(misuse("begin_frame called after shutdown"));
        }
        self.frm.begin_frame(&mut self.res)
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.frm.end_frame()
    }

    pub fn current_slot_index(&self) -> usize {
        self.frm.current_slot()
    }

    pub fn max_slots_in_flight(&self) -> usize {
        self.frm.slot_count()
    }

    pub fn is_mid_frame(&self) -> bool {
        self.frm.is_mid_frame()
    }

    /// Returns a descriptor set of `layout` with `state` written into it. The set may be
    /// bound until the current slot begins its next frame.
    pub fn acquire_descriptor_set(
        &mut self,
        layout: &DescriptorSetLayoutDesc,
        state: &BindingState<'_>,
    ) -> Result<vk::DescriptorSet> {
        if !self.frm.is_mid_frame() {
            return Err(misuse("Descriptor sets can only be acquired between begin_frame and end_frame"));
        }
        self.res.acquire(self.frm.current_slot(), layout, state)
    }

    pub fn descriptor_set_cache(&self, layout: vk::DescriptorSetLayout) -> Option<&DescriptorSetCache> {
        self.res.cache(layout)
    }

    pub fn get_or_create_pipeline(
        &mut self,
        key: &PipelineKey,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Pipeline> {
        self.pip.get_or_create(key, desc)
    }

    pub fn get_or_create_compute_pipeline(
        &mut self,
        key: &ComputePipelineKey,
        desc: &ComputePipelineDesc,
    ) -> Result<Pipeline> {
        self.pip.get_or_create_compute(key, desc)
    }

    pub fn cached_pipeline_count(&self) -> usize {
        self.pip.len() + self.pip.compute_len()
    }

    /// Empties the pipeline caches. The pipelines themselves are destroyed once the GPU
    /// can no longer be using them.
    pub fn clear_pipeline_cache(&mut self) {
        let pipelines = self.pip.take_all();
        if pipelines.is_empty() {
            return;
        }

        log::debug!("Clearing {} cached pipelines", pipelines.len());

        let factory = self.pip.factory();
        self.frm.queue_destruction(Box::new(move || {
            for pipeline in pipelines {
                factory.destroy_pipeline(pipeline);
            }
        }));
    }

    /// Defers `destructor` until the GPU has finished every submission that could reference
    /// the object it destroys.
    pub fn queue_destruction(&mut self, destructor: Destructor) {
        self.frm.queue_destruction(destructor);
    }

    pub fn pending_destruction_count(&self) -> usize {
        self.frm.destruction.total_pending()
    }

    pub fn request_clear(&mut self, target: Arc<dyn TransferTarget>) {
        self.frm.transfers.request_clear(target);
    }

    pub fn request_upload(&mut self, target: Arc<dyn TransferTarget>) {
        self.frm.transfers.request_upload(target);
    }

    pub fn request_download(&mut self, target: Arc<dyn TransferTarget>) {
        self.frm.transfers.request_download(target);
    }

    /// Forgets every transfer request of `id`. Must be called before the resource is
    /// destroyed.
    pub fn remove_transfer_requests(&mut self, id: ResourceId) {
        if self.frm.transfers.remove_requests(id) {
            log::trace!("Removed transfer requests of {:?}", id);
        }
    }

    pub fn begin_headless_recording(&mut self) -> Result<vk::CommandBuffer> {
        self.frm.begin_headless_recording()
    }

    pub fn end_headless_recording(&mut self) -> Result<()> {
        self.frm.end_headless_recording()
    }

    pub fn begin_compute_recording(&mut self) -> Result<vk::CommandBuffer> {
        self.frm.begin_compute_recording()
    }

    pub fn end_compute_recording(&mut self) -> Result<()> {
        self.frm.end_compute_recording()
    }

    pub fn notify_window_submitted(&mut self) {
        self.frm.notify_window_submitted();
    }

    pub fn current_command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.frm.current_command_buffer()
    }

    pub fn submit_ops(&self) -> QueueSubmitOps {
        self.frm.submit_ops()
    }

    pub fn wait_device_idle(&mut self) -> Result<()> {
        self.frm.wait_device_idle()
    }

    /// Waits for the device and releases everything the renderer still holds. The renderer
    /// can not begin frames afterwards.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        if self.frm.is_mid_frame() {
            log::warn!("Shutting down in the middle of a frame");
        }
        self.shut_down = true;

        self.frm.wait_device_idle()?;
        self.clear_pipeline_cache();
        self.res.destroy()?;

        log::info!("Renderer shut down");

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Renderer shutdown failed: {:?}", e);
        }
    }
}
