use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use crate::renderer::contexts::device_ctx::RenderDevice;

/// A command buffer owned by one frame slot, reused every time that slot comes around.
pub struct CommandEncoder {
    pub command_buffer: vk::CommandBuffer,

    is_recording: bool,

    device: Arc<dyn RenderDevice>,
}

impl CommandEncoder {
    pub fn new(
        command_buffer: vk::CommandBuffer,
        device: Arc<dyn RenderDevice>,
    ) -> Self {
        Self {
            command_buffer,
            device,
            is_recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn begin_recording(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(eyre!("Command buffer is already recording"));
        }

        self.device.begin_command_buffer(self.command_buffer)?;
        self.is_recording = true;

        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<()> {
        if !self.is_recording {
            return Err(eyre!("Command buffer is not recording"));
        }

        self.device.end_command_buffer(self.command_buffer)?;
        self.is_recording = false;

        Ok(())
    }

    /// Ends recording and submits the command buffer without a fence. Completion is
    /// covered by the slot fence signaled at the end of the frame.
    pub fn submit(&mut self) -> Result<()> {
        self.end_recording()?;
        self.device.submit(&[self.command_buffer], vk::Fence::null())
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        if self.is_recording {
            log::warn!("Dropping CommandEncoder while still recording");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::MockDevice;

    #[test]
    fn recording_twice_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let command_buffer = device.allocate_command_buffers(1).unwrap()[0];
        let mut encoder = CommandEncoder::new(command_buffer, device.clone());

        encoder.begin_recording().unwrap();
        assert!(encoder.is_recording());
        assert!(encoder.begin_recording().is_err());

        encoder.submit().unwrap();
        assert!(!encoder.is_recording());
        assert_eq!(device.submissions().len(), 1);
        assert_eq!(device.submissions()[0].command_buffers, vec![command_buffer]);
        assert_eq!(device.submissions()[0].fence, vk::Fence::null());
    }

    #[test]
    fn ending_without_recording_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let command_buffer = device.allocate_command_buffers(1).unwrap()[0];
        let mut encoder = CommandEncoder::new(command_buffer, device);
        assert!(encoder.end_recording().is_err());
    }
}
