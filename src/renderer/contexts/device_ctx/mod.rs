pub mod command_encoder;
pub mod device;
pub mod queue;

use ash::vk;
use color_eyre::Result;

/// Responsibilities:
/// - Submit recorded command buffers to the queue
/// - Create, wait on, poll and reset completion fences
/// - Apply descriptor set writes
/// - Reach a fully idle device on request
///
/// The frame engine only ever talks to the GPU through this trait. `VulkanDevice` is the
/// ash backed implementation.
pub trait RenderDevice: Send + Sync {
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    /// Resets `command_buffer` and begins one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    /// Submits `command_buffers` in order. A non-null `fence` signals once all work
    /// submitted to the queue up to and including this call has completed, so an empty
    /// slice with a fence works as a plain completion signal.
    fn submit(&self, command_buffers: &[vk::CommandBuffer], fence: vk::Fence) -> Result<()>;

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);
    fn wait_idle(&self) -> Result<()>;

    fn supports_compute(&self) -> bool {
        true
    }
}
