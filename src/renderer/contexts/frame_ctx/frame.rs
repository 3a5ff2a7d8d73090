use std::sync::Arc;
use ash::vk;
use bitflags::bitflags;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::device_ctx::command_encoder::CommandEncoder;

bitflags! {
    /// Kinds of queue work submitted under a slot during the current frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueSubmitOps: u32 {
        const RENDERING = 0x01;
        const HEADLESS_RENDERING = 0x02;
        const COMPUTE = 0x04;
    }
}

/// Everything owned by one frame slot.
pub struct Frame {
    // Signals when every submission made under this slot has finished execution.
    pub fence: vk::Fence,

    pub upload_encoder: CommandEncoder,
    pub download_encoder: CommandEncoder,
    pub headless_encoder: CommandEncoder,
    pub compute_encoder: CommandEncoder,

    pub submit_ops: QueueSubmitOps,

    device: Arc<dyn RenderDevice>,
}

impl Frame {
    pub fn new(device: Arc<dyn RenderDevice>) -> Result<Self> {
        // Created signaled so the first wait on a fresh slot returns at once
        let fence = device.create_fence(true)?;

        let command_buffers = match device.allocate_command_buffers(4) {
            Ok(command_buffers) => command_buffers,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e);
            }
        };
        let &[upload, download, headless, compute] = command_buffers.as_slice() else {
            device.free_command_buffers(&command_buffers);
            device.destroy_fence(fence);
            return Err(eyre!("Expected 4 frame command buffers, got {}", command_buffers.len()));
        };

        Ok(Self {
            fence,
            upload_encoder: CommandEncoder::new(upload, device.clone()),
            download_encoder: CommandEncoder::new(download, device.clone()),
            headless_encoder: CommandEncoder::new(headless, device.clone()),
            compute_encoder: CommandEncoder::new(compute, device.clone()),
            submit_ops: QueueSubmitOps::empty(),
            device,
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.device.free_command_buffers(&[
            self.upload_encoder.command_buffer,
            self.download_encoder.command_buffer,
            self.headless_encoder.command_buffer,
            self.compute_encoder.command_buffer,
        ]);
        self.device.destroy_fence(self.fence);
    }
}
