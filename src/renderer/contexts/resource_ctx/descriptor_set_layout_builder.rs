use ash::vk;
use color_eyre::Result;
use gpu_descriptor::DescriptorTotalCount;

/// Kinds of bindings a cached descriptor set can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    StorageImage,
    CombinedImageSampler,
    SampledImage,
    Sampler,
}

impl BindingKind {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// Per-type descriptor counts of one set layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorCounts {
    pub uniform_buffer: u32,
    pub storage_buffer: u32,
    pub storage_image: u32,
    pub combined_image_sampler: u32,
    pub sampled_image: u32,
    pub sampler: u32,
}

impl DescriptorCounts {
    pub fn add(&mut self, kind: BindingKind, count: u32) {
        match kind {
            BindingKind::UniformBuffer => self.uniform_buffer += count,
            BindingKind::StorageBuffer => self.storage_buffer += count,
            BindingKind::StorageImage => self.storage_image += count,
            BindingKind::CombinedImageSampler => self.combined_image_sampler += count,
            BindingKind::SampledImage => self.sampled_image += count,
            BindingKind::Sampler => self.sampler += count,
        }
    }

    pub fn total_count(&self) -> DescriptorTotalCount {
        DescriptorTotalCount {
            sampler: self.sampler,
            combined_image_sampler: self.combined_image_sampler,
            sampled_image: self.sampled_image,
            storage_image: self.storage_image,
            uniform_texel_buffer: 0,
            storage_texel_buffer: 0,
            uniform_buffer: self.uniform_buffer,
            storage_buffer: self.storage_buffer,
            uniform_buffer_dynamic: 0,
            storage_buffer_dynamic: 0,
            input_attachment: 0,
            acceleration_structure: 0,
            inline_uniform_block_bytes: 0,
            inline_uniform_block_bindings: 0,
        }
    }
}

/// A created set layout together with what is needed to allocate sets from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub layout: vk::DescriptorSetLayout,
    pub counts: DescriptorCounts,
    pub update_after_bind: bool,
}

pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
    counts: DescriptorCounts,
    update_after_bind: bool,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            counts: DescriptorCounts::default(),
            update_after_bind: false,
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        kind: BindingKind,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let layout_binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(kind.descriptor_type())
            .descriptor_count(descriptor_count)
            .stage_flags(stages);

        self.bindings.push(layout_binding);
        self.counts.add(kind, descriptor_count);
        self
    }

    pub fn with_update_after_bind(mut self) -> Self {
        self.update_after_bind = true;
        self
    }

    pub fn counts(&self) -> DescriptorCounts {
        self.counts
    }

    pub fn build(self, device: &ash::Device) -> Result<DescriptorSetLayoutDesc> {
        let (layout_flags, binding_flags) = if self.update_after_bind {
            (
                vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
            )
        } else {
            (
                vk::DescriptorSetLayoutCreateFlags::empty(),
                vk::DescriptorBindingFlags::empty(),
            )
        };
        let binding_flags = vec![binding_flags; self.bindings.len()];

        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .flags(layout_flags)
            .push_next(&mut binding_flags_info);

        let layout = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        };

        Ok(DescriptorSetLayoutDesc {
            layout,
            counts: self.counts,
            update_after_bind: self.update_after_bind,
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}
