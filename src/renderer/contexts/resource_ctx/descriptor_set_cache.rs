use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::resource_ctx::allocator::{DescriptorSetAllocator, UniformStorage};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutDesc;
use crate::renderer::util::misuse;

pub struct UniformBinding<'a> {
    pub binding: u32,
    pub data: &'a [u8],
}

impl<'a> UniformBinding<'a> {
    pub fn new(binding: u32, data: &'a [u8]) -> Self {
        Self { binding, data }
    }

    pub fn from_pod<T: Pod>(binding: u32, value: &'a T) -> Self {
        Self {
            binding,
            data: bytemuck::bytes_of(value),
        }
    }
}

pub struct StorageBufferBinding {
    pub binding: u32,
    pub info: vk::DescriptorBufferInfo,
}

pub struct SamplerBinding<'a> {
    pub binding: u32,
    pub images: &'a [vk::DescriptorImageInfo],
}

/// The complete binding state written into a descriptor set on every acquire.
#[derive(Default)]
pub struct BindingState<'a> {
    pub uniforms: Vec<UniformBinding<'a>>,
    pub storage_buffers: Vec<StorageBufferBinding>,
    pub samplers: Vec<SamplerBinding<'a>>,
}

impl<'a> BindingState<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uniform(mut self, binding: u32, data: &'a [u8]) -> Self {
        self.uniforms.push(UniformBinding::new(binding, data));
        self
    }

    pub fn with_uniform_pod<T: Pod>(mut self, binding: u32, value: &'a T) -> Self {
        self.uniforms.push(UniformBinding::from_pod(binding, value));
        self
    }

    pub fn with_storage_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        self.storage_buffers.push(StorageBufferBinding { binding, info });
        self
    }

    pub fn with_sampler(mut self, binding: u32, images: &'a [vk::DescriptorImageInfo]) -> Self {
        self.samplers.push(SamplerBinding { binding, images });
        self
    }
}

struct CachedDescriptorSet {
    set: vk::DescriptorSet,
    // Sized by the data of the acquire that allocated the set
    uniform_buffers: BTreeMap<u32, Box<dyn UniformStorage>>,
}

/// Pool of descriptor sets of one layout, recycled per frame slot.
///
/// Sets acquired during a frame are tagged with its slot and return to the free list when
/// that slot comes around again. By then the slot fence has been waited on, so the GPU no
/// longer reads them. The cache never shrinks.
pub struct DescriptorSetCache {
    layout: DescriptorSetLayoutDesc,
    entries: Vec<CachedDescriptorSet>,
    free: Vec<usize>,
    used: Vec<Vec<usize>>,

    allocator: Arc<Mutex<dyn DescriptorSetAllocator>>,
    device: Arc<dyn RenderDevice>,
}

impl DescriptorSetCache {
    pub fn new(
        layout: DescriptorSetLayoutDesc,
        slot_count: usize,
        allocator: Arc<Mutex<dyn DescriptorSetAllocator>>,
        device: Arc<dyn RenderDevice>,
    ) -> Self {
        Self {
            layout,
            entries: Vec::new(),
            free: Vec::new(),
            used: (0..slot_count).map(|_| Vec::new()).collect(),
            allocator,
            device,
        }
    }

    pub fn layout(&self) -> &DescriptorSetLayoutDesc {
        &self.layout
    }

    /// Hands out a set for use in `slot` with `state` fully written into it. The set stays
    /// valid until the same slot begins its next frame.
    pub fn acquire(&mut self, slot: usize, state: &BindingState<'_>) -> Result<vk::DescriptorSet> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => self.allocate(state)?,
        };
        self.used[slot].push(index);

        self.write(index, state)?;

        Ok(self.entries[index].set)
    }

    /// Returns every set used in `slot` to the free list. Only call once the slot fence has
    /// been waited on.
    pub fn release(&mut self, slot: usize) {
        let used = std::mem::take(&mut self.used[slot]);
        self.free.extend(used);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self, slot: usize) -> usize {
        self.used[slot].len()
    }

    fn allocate(&mut self, state: &BindingState<'_>) -> Result<usize> {
        let mut allocator = self.allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;

        let set = allocator
            .allocate_descriptor_set(&self.layout)
            .wrap_err("Descriptor set allocation failed")?;
        let uniform_buffers = state.uniforms
            .iter()
            .map(|uniform| {
                let buffer = allocator.create_uniform_buffer(uniform.data.len() as u64)?;
                Ok((uniform.binding, buffer))
            })
            .collect::<Result<BTreeMap<_, _>>>();
        let uniform_buffers = match uniform_buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                allocator.free_descriptor_set(set);
                return Err(e.wrap_err("Uniform buffer allocation failed"));
            }
        };

        self.entries.push(CachedDescriptorSet {
            set,
            uniform_buffers,
        });

        log::debug!(
            "Descriptor set cache for {:?} grew to {} sets",
            self.layout.layout,
            self.entries.len(),
        );

        Ok(self.entries.len() - 1)
    }

    fn write(&mut self, index: usize, state: &BindingState<'_>) -> Result<()> {
        let entry = &mut self.entries[index];
        if entry.uniform_buffers.len() != state.uniforms.len() {
            return Err(misuse(&format!(
                "Binding state has {} uniforms but the cached set was created with {}",
                state.uniforms.len(),
                entry.uniform_buffers.len(),
            )));
        }
        if let Some(uniform) = state.uniforms
            .iter()
            .find(|uniform| !entry.uniform_buffers.contains_key(&uniform.binding))
        {
            return Err(misuse(&format!(
                "Cached set has no uniform buffer for binding {}",
                uniform.binding,
            )));
        }

        let mut uniform_infos: SmallVec<[(u32, vk::DescriptorBufferInfo); 8]> = SmallVec::new();
        for uniform in &state.uniforms {
            let buffer = entry.uniform_buffers
                .get_mut(&uniform.binding)
                .ok_or_eyre("Uniform buffer missing")?;
            buffer.write(uniform.data)?;
            uniform_infos.push((
                uniform.binding,
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer())
                    .offset(0)
                    .range(buffer.size()),
            ));
        }

        let mut writes: SmallVec<[vk::WriteDescriptorSet<'_>; 16]> = SmallVec::new();
        for (binding, info) in &uniform_infos {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(entry.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for storage in &state.storage_buffers {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(entry.set)
                    .dst_binding(storage.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&storage.info)),
            );
        }
        for sampler in &state.samplers {
            if sampler.images.is_empty() {
                continue;
            }
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(entry.set)
                    .dst_binding(sampler.binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(sampler.images),
            );
        }

        if !writes.is_empty() {
            self.device.update_descriptor_sets(&writes);
        }

        Ok(())
    }
}
