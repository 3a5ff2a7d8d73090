pub mod allocator;
pub mod descriptor_set_cache;
pub mod descriptor_set_layout_builder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::resource_ctx::allocator::DescriptorSetAllocator;
use crate::renderer::contexts::resource_ctx::descriptor_set_cache::{BindingState, DescriptorSetCache};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutDesc;

/// Responsibilities:
/// - Own one descriptor set cache per set layout
/// - Recycle every cache's sets when a frame slot comes around again
/// - Return all descriptor memory on shutdown
pub struct RenderResourceContext {
    caches: HashMap<vk::DescriptorSetLayout, DescriptorSetCache>,
    slot_count: usize,

    allocator: Arc<Mutex<dyn DescriptorSetAllocator>>,
    device: Arc<dyn RenderDevice>,
}

impl RenderResourceContext {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        allocator: Arc<Mutex<dyn DescriptorSetAllocator>>,
        slot_count: usize,
    ) -> Self {
        Self {
            caches: HashMap::new(),
            slot_count,
            allocator,
            device,
        }
    }

    pub fn get_or_create_cache(&mut self, layout: &DescriptorSetLayoutDesc) -> &mut DescriptorSetCache {
        let slot_count = self.slot_count;
        let allocator = &self.allocator;
        let device = &self.device;
        self.caches
            .entry(layout.layout)
            .or_insert_with(|| {
                log::debug!("Creating descriptor set cache for layout {:?}", layout.layout);
                DescriptorSetCache::new(layout.clone(), slot_count, allocator.clone(), device.clone())
            })
    }

    pub fn cache(&self, layout: vk::DescriptorSetLayout) -> Option<&DescriptorSetCache> {
        self.caches.get(&layout)
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    pub fn acquire(
        &mut self,
        slot: usize,
        layout: &DescriptorSetLayoutDesc,
        state: &BindingState<'_>,
    ) -> Result<vk::DescriptorSet> {
        self.get_or_create_cache(layout).acquire(slot, state)
    }

    pub fn release(&mut self, slot: usize) {
        for cache in self.caches.values_mut() {
            cache.release(slot);
        }
    }

    /// Drops every cache and returns their sets to the allocator. The device must be idle.
    pub fn destroy(&mut self) -> Result<()> {
        let count = self.caches.len();
        self.caches.clear();
        self.allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .release_all();

        log::debug!("Destroyed {} descriptor set caches", count);

        Ok(())
    }
}
