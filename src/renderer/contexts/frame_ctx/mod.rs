pub mod destruction;
pub mod frame;
pub mod transfer;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::frame_ctx::destruction::{DestructionQueue, Destructor};
use crate::renderer::contexts::frame_ctx::frame::{Frame, QueueSubmitOps};
use crate::renderer::contexts::frame_ctx::transfer::{TransferQueue, TransferRecorder, TransferRequest};
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::util::{misuse, next_slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recording {
    Headless,
    Compute,
}

/// Responsibilities:
/// - Rotate through the frame slots and bracket each frame with its fence
/// - Run deferred destruction once a slot is known to be idle
/// - Batch uploads at the start and downloads at the end of a frame
/// - Track headless and compute recording within a frame
pub struct RenderFrameContext {
    frames: Vec<Frame>,
    current: usize,
    mid_frame: bool,
    recording: Option<Recording>,
    fence_timeout_ns: u64,

    pub destruction: DestructionQueue,
    pub transfers: TransferQueue,

    device: Arc<dyn RenderDevice>,
}

impl RenderFrameContext {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        config: &RenderConfig,
    ) -> Result<Self> {
        config.validate()?;

        let frames = (0..config.frames_in_flight)
            .map(|_| Frame::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("Created {} frame slots", frames.len());

        Ok(Self {
            frames,
            current: 0,
            mid_frame: false,
            recording: None,
            fence_timeout_ns: config.fence_timeout_ns,
            destruction: DestructionQueue::new(
                config.frames_in_flight,
                config.destroy_immediately_at_init,
            ),
            transfers: TransferQueue::new(config.frames_in_flight),
            device,
        })
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_mid_frame(&self) -> bool {
        self.mid_frame
    }

    pub fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frames[slot].fence
    }

    pub fn submit_ops(&self) -> QueueSubmitOps {
        self.frames[self.current].submit_ops
    }

    /// Opens the frame of the current slot.
    ///
    /// Waits for the slot's previous work, reports finished downloads, recycles the
    /// slot's descriptor sets, runs its deferred destruction and submits pending uploads.
    pub fn begin_frame(&mut self, res: &mut RenderResourceContext) -> Result<()> {
        if self.mid_frame {
            return Err(misuse("begin_frame called while a frame is already in progress"));
        }

        let slot = self.current;
        self.destruction.set_immediate(false);
        self.mid_frame = true;
        self.frames[slot].submit_ops = QueueSubmitOps::empty();

        // Past this wait nothing submitted under `slot` is still executing
        let fence = self.frames[slot].fence;
        if let Err(e) = self.device.wait_for_fence(fence, self.fence_timeout_ns) {
            log::error!("Waiting for frame slot {} failed: {:?}", slot, e);
            return Err(e.wrap_err("Device lost while waiting for frame fence"));
        }

        // Polled before this slot's fence is reset, so its own downloads show up now
        // instead of a full cycle later
        self.update_downloads()?;

        res.release(slot);
        let destroyed = self.destruction.process(slot);
        self.upload_data()?;

        log::trace!("Began frame in slot {} ({} deferred destructions)", slot, destroyed);

        Ok(())
    }

    /// Closes the frame: submits the download batch and the fence signal for the slot,
    /// then advances to the next slot.
    pub fn end_frame(&mut self) -> Result<()> {
        if !self.mid_frame {
            return Err(misuse("end_frame called without a matching begin_frame"));
        }
        if self.recording.is_some() {
            return Err(misuse("end_frame called while a recording is still open"));
        }

        let slot = self.current;
        let fence = self.frames[slot].fence;

        let signaled = self.device.fence_signaled(fence)?;
        debug_assert!(signaled, "Fence of slot {} is not signaled at end of frame", slot);

        // Reset right before the signal is submitted so a wait can never hang on it
        self.device.reset_fence(fence)?;
        self.download_data()?;
        self.device.submit(&[], fence)?;

        self.current = next_slot(slot, self.frames.len());
        self.mid_frame = false;

        log::trace!("Ended frame in slot {}", slot);

        Ok(())
    }

    pub fn queue_destruction(&mut self, destructor: Destructor) {
        self.destruction.queue(self.current, self.mid_frame, destructor);
    }

    /// Waits for the device to go idle and runs every deferred destruction. Until the next
    /// `begin_frame` destruction requests run immediately.
    pub fn wait_device_idle(&mut self) -> Result<()> {
        self.device.wait_idle().wrap_err("Failed to wait for device idle")?;

        let destroyed = self.destruction.process_all();
        self.destruction.set_immediate(true);

        log::debug!("Device idle, ran {} deferred destructions", destroyed);

        Ok(())
    }

    pub fn begin_headless_recording(&mut self) -> Result<vk::CommandBuffer> {
        self.check_can_record("begin_headless_recording")?;

        let frame = &mut self.frames[self.current];
        frame.headless_encoder.begin_recording()?;
        self.recording = Some(Recording::Headless);

        Ok(frame.headless_encoder.command_buffer)
    }

    pub fn end_headless_recording(&mut self) -> Result<()> {
        if self.recording != Some(Recording::Headless) {
            return Err(misuse("end_headless_recording called without an open headless recording"));
        }

        let frame = &mut self.frames[self.current];
        frame.headless_encoder.submit()?;
        frame.submit_ops |= QueueSubmitOps::HEADLESS_RENDERING;
        self.recording = None;

        Ok(())
    }

    pub fn begin_compute_recording(&mut self) -> Result<vk::CommandBuffer> {
        self.check_can_record("begin_compute_recording")?;

        if !self.device.supports_compute() {
            return Err(misuse("Compute recording requested but the queue has no compute support"));
        }
        let rendered = QueueSubmitOps::RENDERING | QueueSubmitOps::HEADLESS_RENDERING;
        if self.frames[self.current].submit_ops.intersects(rendered) {
            return Err(misuse("Compute work must be recorded before any rendering work in a frame"));
        }

        let frame = &mut self.frames[self.current];
        frame.compute_encoder.begin_recording()?;
        self.recording = Some(Recording::Compute);

        Ok(frame.compute_encoder.command_buffer)
    }

    pub fn end_compute_recording(&mut self) -> Result<()> {
        if self.recording != Some(Recording::Compute) {
            return Err(misuse("end_compute_recording called without an open compute recording"));
        }

        let frame = &mut self.frames[self.current];
        frame.compute_encoder.submit()?;
        frame.submit_ops |= QueueSubmitOps::COMPUTE;
        self.recording = None;

        Ok(())
    }

    /// Marks that window rendering work was submitted in the current frame.
    pub fn notify_window_submitted(&mut self) {
        self.frames[self.current].submit_ops |= QueueSubmitOps::RENDERING;
    }

    /// Command buffer of the open headless or compute recording.
    pub fn current_command_buffer(&self) -> Option<vk::CommandBuffer> {
        let frame = &self.frames[self.current];
        match self.recording {
            Some(Recording::Headless) => Some(frame.headless_encoder.command_buffer),
            Some(Recording::Compute) => Some(frame.compute_encoder.command_buffer),
            None => None,
        }
    }

    fn check_can_record(&self, operation: &str) -> Result<()> {
        if !self.mid_frame {
            return Err(misuse(&format!("{} called outside of a frame", operation)));
        }
        if self.recording.is_some() {
            return Err(misuse(&format!("{} called while another recording is open", operation)));
        }
        Ok(())
    }

    /// Reports downloads of every slot whose fence has signaled.
    fn update_downloads(&mut self) -> Result<()> {
        for slot in 0..self.frames.len() {
            if !self.transfers.has_in_flight_downloads(slot) {
                continue;
            }
            if self.device.fence_signaled(self.frames[slot].fence)? {
                let count = self.transfers.complete_downloads(slot);
                log::trace!("{} downloads of slot {} are ready", count, slot);
            }
        }
        Ok(())
    }

    fn upload_data(&mut self) -> Result<()> {
        let batch = self.transfers.drain_uploads();
        if batch.is_empty() {
            return Ok(());
        }

        let slot = self.current;
        let frame = &mut self.frames[slot];
        frame.upload_encoder.begin_recording()?;

        let mut recorder = TransferRecorder::new(
            frame.upload_encoder.command_buffer,
            slot,
            &*self.device,
            &mut self.destruction,
        );
        for (request, target) in &batch {
            match request {
                TransferRequest::Clear => target.record_clear(&mut recorder)?,
                TransferRequest::Upload => target.record_upload(&mut recorder)?,
            }
        }

        frame.upload_encoder.submit()?;

        log::trace!("Submitted {} clears and uploads in slot {}", batch.len(), slot);

        Ok(())
    }

    fn download_data(&mut self) -> Result<()> {
        let slot = self.current;
        let downloads = self.transfers.begin_downloads(slot);
        if downloads.is_empty() {
            return Ok(());
        }

        let frame = &mut self.frames[slot];
        frame.download_encoder.begin_recording()?;

        let mut recorder = TransferRecorder::new(
            frame.download_encoder.command_buffer,
            slot,
            &*self.device,
            &mut self.destruction,
        );
        for target in &downloads {
            target.record_download(&mut recorder)?;
        }

        frame.download_encoder.submit()?;

        log::trace!("Submitted {} downloads in slot {}", downloads.len(), slot);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::testing::{
        FenceState, MockDevice, MockTarget, TransferEvent, mock_resource_context,
    };

    fn frame_context(device: &Arc<MockDevice>, slots: usize) -> RenderFrameContext {
        let config = RenderConfig::default().with_frames_in_flight(slots);
        RenderFrameContext::new(device.clone(), &config).unwrap()
    }

    #[test]
    fn slots_rotate_and_fences_are_signaled_per_frame() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 3);
        let mut frm = frame_context(&device, 3);

        for expected in [0, 1, 2, 0, 1] {
            assert_eq!(frm.current_slot(), expected);
            frm.begin_frame(&mut res).unwrap();
            assert!(frm.is_mid_frame());
            frm.end_frame().unwrap();
            assert!(!frm.is_mid_frame());
            assert_eq!(device.fence_state(frm.slot_fence(expected)), FenceState::Pending);
            assert_eq!(device.submissions().last().unwrap().fence, frm.slot_fence(expected));
        }
    }

    #[test]
    fn begin_frame_waits_on_the_slot_fence() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        frm.end_frame().unwrap();
        frm.begin_frame(&mut res).unwrap();
        frm.end_frame().unwrap();

        let fence = frm.slot_fence(0);
        assert_eq!(device.fence_state(fence), FenceState::Pending);
        frm.begin_frame(&mut res).unwrap();
        assert_eq!(device.fence_state(fence), FenceState::Signaled);
        assert!(device.fence_waits().contains(&fence));
        frm.end_frame().unwrap();
    }

    #[test]
    fn lost_device_is_fatal() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        device.set_lost(true);
        assert!(frm.begin_frame(&mut res).is_err());
    }

    #[test]
    fn uploads_are_recorded_at_begin_frame() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        frm.end_frame().unwrap();
        let before = device.submissions().len();

        let target = MockTarget::buffer();
        frm.transfers.request_upload(target.clone());
        frm.begin_frame(&mut res).unwrap();

        assert_eq!(target.events(), vec![TransferEvent::Upload(1)]);
        let submissions = device.submissions();
        assert_eq!(submissions.len(), before + 1);
        assert_eq!(
            submissions[before].command_buffers,
            vec![frm.frames[1].upload_encoder.command_buffer],
        );
        frm.end_frame().unwrap();
    }

    #[test]
    fn empty_frames_submit_only_the_fence_signal() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        frm.end_frame().unwrap();

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].command_buffers.is_empty());
    }

    #[test]
    fn staging_destroyed_after_slot_completes() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        let target = MockTarget::texture().with_staging();
        frm.transfers.request_upload(target.clone());
        frm.begin_frame(&mut res).unwrap();
        assert_eq!(frm.destruction.pending(0), 1);
        assert_eq!(target.staging_destroyed(), 0);
        frm.end_frame().unwrap();

        frm.begin_frame(&mut res).unwrap();
        frm.end_frame().unwrap();
        assert_eq!(target.staging_destroyed(), 0);

        frm.begin_frame(&mut res).unwrap();
        assert_eq!(target.staging_destroyed(), 1);
        frm.end_frame().unwrap();
    }

    #[test]
    fn headless_and_compute_recordings_mark_submit_ops() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        let compute = frm.begin_compute_recording().unwrap();
        assert_eq!(frm.current_command_buffer(), Some(compute));
        frm.end_compute_recording().unwrap();

        let headless = frm.begin_headless_recording().unwrap();
        assert_eq!(frm.current_command_buffer(), Some(headless));
        frm.end_headless_recording().unwrap();
        assert_eq!(frm.current_command_buffer(), None);

        assert_eq!(
            frm.submit_ops(),
            QueueSubmitOps::COMPUTE | QueueSubmitOps::HEADLESS_RENDERING,
        );
        frm.end_frame().unwrap();

        frm.begin_frame(&mut res).unwrap();
        assert!(frm.submit_ops().is_empty());
        frm.end_frame().unwrap();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Compute work must be recorded before any rendering work")]
    fn compute_after_rendering_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        frm.notify_window_submitted();
        let _ = frm.begin_compute_recording();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "begin_frame called while a frame is already in progress")]
    fn nested_begin_frame_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        let _ = frm.begin_frame(&mut res);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "end_frame called without a matching begin_frame")]
    fn end_frame_outside_frame_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut frm = frame_context(&device, 2);
        let _ = frm.end_frame();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "no compute support")]
    fn compute_without_support_is_rejected() {
        let device = Arc::new(MockDevice::new().without_compute());
        let mut res = mock_resource_context(&device, 2);
        let mut frm = frame_context(&device, 2);

        frm.begin_frame(&mut res).unwrap();
        let _ = frm.begin_compute_recording();
    }
}
