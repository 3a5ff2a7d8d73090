use color_eyre::Result;
use color_eyre::eyre::eyre;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
pub const DEFAULT_MAX_UPDATE_AFTER_BIND_DESCRIPTORS: u32 = 1024;

/// Contains configuration options for the frame engine like the number of frames in flight
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Number of slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Timeout handed to every slot fence wait. The default is effectively unbounded.
    pub fence_timeout_ns: u64,
    pub max_update_after_bind_descriptors: u32,
    /// Before the first frame the device is idle, so queued destructors can run right away.
    pub destroy_immediately_at_init: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            fence_timeout_ns: u64::MAX,
            max_update_after_bind_descriptors: DEFAULT_MAX_UPDATE_AFTER_BIND_DESCRIPTORS,
            destroy_immediately_at_init: true,
        }
    }
}

impl RenderConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    pub fn with_max_update_after_bind_descriptors(mut self, count: u32) -> Self {
        self.max_update_after_bind_descriptors = count;
        self
    }

    pub fn with_destroy_immediately_at_init(mut self, enable: bool) -> Self {
        self.destroy_immediately_at_init = enable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(eyre!("At least one frame in flight is required"));
        }
        if self.fence_timeout_ns == 0 {
            return Err(eyre!("Fence timeout must be non-zero"));
        }
        Ok(())
    }
}
