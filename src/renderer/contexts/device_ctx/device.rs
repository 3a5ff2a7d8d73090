use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{eyre, WrapErr};
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;

/// Vulkan implementation of [`RenderDevice`].
///
/// Wraps an already created logical device together with the queue every frame
/// submission goes to. Command buffers come from a single resettable pool.
pub struct VulkanDevice {
    pub logical: Arc<ash::Device>,
    pub queue: Arc<Queue>,

    command_pool: vk::CommandPool,
}

impl VulkanDevice {
    pub fn new(
        logical: Arc<ash::Device>,
        queue: Arc<Queue>,
    ) -> Result<Self> {
        if !queue.family.supports_graphics() {
            return Err(eyre!(
                "Queue family {} does not support graphics",
                queue.family.index,
            ));
        }
        if !queue.family.supports_compute() {
            log::info!(
                "Queue family {} has no compute support, compute recording is disabled",
                queue.family.index,
            );
        }

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family.index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            logical.create_command_pool(&pool_info, None)?
        };

        Ok(Self {
            logical,
            queue,
            command_pool,
        })
    }
}

impl RenderDevice for VulkanDevice {
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);

        Ok(unsafe {
            self.logical.create_fence(&fence_info, None)?
        })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe {
            self.logical.destroy_fence(fence, None);
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe {
            self.logical
                .wait_for_fences(&[fence], true, timeout_ns)
                .wrap_err("Failed to wait for frame fence")?;
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe {
            self.logical.get_fence_status(fence)?
        })
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe {
            self.logical.reset_fences(&[fence])?;
        }
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .command_buffer_count(count)
            .level(vk::CommandBufferLevel::PRIMARY);

        Ok(unsafe {
            self.logical.allocate_command_buffers(&command_buffer_info)?
        })
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.logical.free_command_buffers(self.command_pool, command_buffers);
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.logical.reset_command_buffer(
                command_buffer,
                vk::CommandBufferResetFlags::RELEASE_RESOURCES,
            )?;
            self.logical.begin_command_buffer(command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.logical.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    fn submit(&self, command_buffers: &[vk::CommandBuffer], fence: vk::Fence) -> Result<()> {
        unsafe {
            if command_buffers.is_empty() {
                self.logical.queue_submit(self.queue.handle, &[], fence)?;
            } else {
                let submit_info = vk::SubmitInfo::default()
                    .command_buffers(command_buffers);
                self.logical.queue_submit(self.queue.handle, &[submit_info], fence)?;
            }
        }
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe {
            self.logical.update_descriptor_sets(writes, &[]);
        }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    fn supports_compute(&self) -> bool {
        self.queue.family.supports_compute()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.logical.destroy_command_pool(self.command_pool, None);
        }
    }
}
