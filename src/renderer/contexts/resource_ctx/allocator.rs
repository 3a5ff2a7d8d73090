use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt};
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_descriptor::{
    CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags,
    DescriptorSet, DescriptorSetLayoutCreateFlags, DescriptorTotalCount, DeviceAllocationError,
};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutDesc;

/// Host visible memory backing one uniform binding of a cached descriptor set.
pub trait UniformStorage: Send {
    fn buffer(&self) -> vk::Buffer;
    fn size(&self) -> u64;
    /// Overwrites the start of the buffer with `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;
}

/// Source of descriptor sets and uniform memory for the descriptor set caches.
pub trait DescriptorSetAllocator: Send {
    fn allocate_descriptor_set(&mut self, layout: &DescriptorSetLayoutDesc) -> Result<vk::DescriptorSet>;
    fn create_uniform_buffer(&mut self, size: u64) -> Result<Box<dyn UniformStorage>>;
    /// Returns a set the GPU never used.
    fn free_descriptor_set(&mut self, set: vk::DescriptorSet);
    /// Returns every set handed out so far. The device must be idle.
    fn release_all(&mut self);
}

/// [`DescriptorSetAllocator`] backed by gpu-descriptor pools and gpu-allocator memory.
pub struct VulkanDescriptorAllocator {
    descriptor_device: DescriptorAshDevice,
    descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    allocated: Vec<DescriptorSet<vk::DescriptorSet>>,

    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl VulkanDescriptorAllocator {
    pub fn new(
        device: Arc<ash::Device>,
        memory_allocator: Arc<Mutex<Allocator>>,
        max_update_after_bind_descriptors: u32,
    ) -> Self {
        Self {
            descriptor_device: DescriptorAshDevice::from(device.clone()),
            descriptor_allocator: DescriptorAllocator::new(max_update_after_bind_descriptors),
            allocated: Vec::new(),
            memory_allocator,
            device,
        }
    }
}

impl DescriptorSetAllocator for VulkanDescriptorAllocator {
    fn allocate_descriptor_set(&mut self, layout: &DescriptorSetLayoutDesc) -> Result<vk::DescriptorSet> {
        let flags = if layout.update_after_bind {
            DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND
        } else {
            DescriptorSetLayoutCreateFlags::empty()
        };

        let mut sets = unsafe {
            self.descriptor_allocator.allocate(
                &self.descriptor_device,
                &layout.layout,
                flags,
                &layout.counts.total_count(),
                1,
            )
        }.map_err(|e| eyre!("Failed to allocate descriptor set: {:?}", e))?;

        let set = sets.pop().ok_or_eyre("Descriptor allocator returned no set")?;
        let raw = *set.raw();
        self.allocated.push(set);

        Ok(raw)
    }

    fn create_uniform_buffer(&mut self, size: u64) -> Result<Box<dyn UniformStorage>> {
        Ok(Box::new(UniformBuffer::new(
            size,
            "descriptor set uniform buffer",
            self.memory_allocator.clone(),
            self.device.clone(),
        )?))
    }

    fn free_descriptor_set(&mut self, set: vk::DescriptorSet) {
        let Some(index) = self.allocated.iter().position(|allocated| *allocated.raw() == set) else {
            log::warn!("Freeing unknown descriptor set {:?}", set);
            return;
        };
        let set = self.allocated.swap_remove(index);
        unsafe {
            self.descriptor_allocator.free(&self.descriptor_device, std::iter::once(set));
        }
    }

    fn release_all(&mut self) {
        unsafe {
            self.descriptor_allocator.free(&self.descriptor_device, self.allocated.drain(..));
            self.descriptor_allocator.cleanup(&self.descriptor_device);
        }
    }
}

impl Drop for VulkanDescriptorAllocator {
    fn drop(&mut self) {
        if !self.allocated.is_empty() {
            log::warn!("Dropping descriptor allocator with {} live sets", self.allocated.len());
        }
        self.release_all();
    }
}

/// Uniform buffer in CPU to GPU memory.
pub struct UniformBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl UniformBuffer {
    pub fn new(
        size: u64,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            )?;
        }

        Ok(Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }
}

impl UniformStorage for UniformBuffer {
    fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.size {
            return Err(eyre!(
                "Uniform data of {} bytes does not fit buffer of {} bytes",
                data.len(),
                self.size,
            ));
        }
        let allocation = self.allocation
            .as_mut()
            .ok_or_eyre("Uniform buffer has no allocation")?;
        presser::copy_from_slice_to_offset(data, allocation, 0)?;
        Ok(())
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free uniform buffer memory: {}", e);
                    }
                }
                Err(e) => log::error!("Memory allocator lock poisoned: {}", e),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let sizes = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
            (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, descriptor_count.acceleration_structure),
        ];
        let pool_sizes: smallvec::SmallVec<[vk::DescriptorPoolSize; 12]> = sizes
            .iter()
            .filter(|(_, count)| *count != 0)
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect();

        if descriptor_count.inline_uniform_block_bytes != 0
            || descriptor_count.inline_uniform_block_bindings != 0
        {
            panic!("Inline uniform blocks are not supported");
        }

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();

        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }

        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(CreatePoolError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => panic!("Unexpected return code '{}'", err),
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        unsafe {
            match self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            ) {
                Ok(allocated) => {
                    sets.extend(allocated);
                    Ok(())
                }
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                    Err(DeviceAllocationError::OutOfHostMemory)
                }
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                    Err(DeviceAllocationError::OutOfDeviceMemory)
                }
                Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
                Err(err) => panic!("Unexpected return code '{}'", err),
            }
        }
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        unsafe {
            if let Err(err) = self.0.free_descriptor_sets(*pool, &sets) {
                log::error!("Failed to free descriptor sets: {}", err);
            }
        }
    }
}
