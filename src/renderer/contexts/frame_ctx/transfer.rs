use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::frame_ctx::destruction::{DestructionQueue, Destructor};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a GPU resource taking part in transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Hands out a process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRequest {
    Clear,
    Upload,
}

/// A texture or buffer that records its own transfer commands.
///
/// Implementors own their staging memory. Staging buffers that must outlive the
/// recorded commands go through [`TransferRecorder::defer_destroy`].
pub trait TransferTarget: Send + Sync {
    fn id(&self) -> ResourceId;
    fn kind(&self) -> ResourceKind;

    fn record_clear(&self, recorder: &mut TransferRecorder<'_>) -> Result<()>;
    fn record_upload(&self, recorder: &mut TransferRecorder<'_>) -> Result<()>;
    fn record_download(&self, recorder: &mut TransferRecorder<'_>) -> Result<()>;

    /// Called once the slot the download was recorded in has completed on the GPU. The
    /// downloaded data is readable from here on.
    fn notify_download_ready(&self, slot: usize);
}

/// Recording state handed to a [`TransferTarget`].
pub struct TransferRecorder<'a> {
    command_buffer: vk::CommandBuffer,
    slot: usize,
    device: &'a dyn RenderDevice,
    destruction: &'a mut DestructionQueue,
}

impl<'a> TransferRecorder<'a> {
    pub fn new(
        command_buffer: vk::CommandBuffer,
        slot: usize,
        device: &'a dyn RenderDevice,
        destruction: &'a mut DestructionQueue,
    ) -> Self {
        Self {
            command_buffer,
            slot,
            device,
            destruction,
        }
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn device(&self) -> &dyn RenderDevice {
        self.device
    }

    /// Destroys something once the commands being recorded have finished executing.
    pub fn defer_destroy(&mut self, destructor: Destructor) {
        self.destruction.queue_on(self.slot, destructor);
    }
}

/// Pending clears, uploads and downloads.
///
/// Clears and uploads are keyed by resource, so requesting either one twice keeps a single
/// entry and the most recent request wins. Downloads are requested during a frame and move
/// into the slot they were recorded in at the end of that frame. They stay there until the
/// slot's fence is seen signaled.
pub struct TransferQueue {
    clears: BTreeMap<ResourceId, Arc<dyn TransferTarget>>,
    uploads: BTreeMap<ResourceId, Arc<dyn TransferTarget>>,
    requested_downloads: Vec<Arc<dyn TransferTarget>>,
    in_flight_downloads: Vec<Vec<Arc<dyn TransferTarget>>>,
}

impl TransferQueue {
    pub fn new(slot_count: usize) -> Self {
        Self {
            clears: BTreeMap::new(),
            uploads: BTreeMap::new(),
            requested_downloads: Vec::new(),
            in_flight_downloads: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    pub fn request_clear(&mut self, target: Arc<dyn TransferTarget>) {
        let id = target.id();
        self.uploads.remove(&id);
        self.clears.insert(id, target);
    }

    pub fn request_upload(&mut self, target: Arc<dyn TransferTarget>) {
        let id = target.id();
        self.clears.remove(&id);
        self.uploads.insert(id, target);
    }

    pub fn request_download(&mut self, target: Arc<dyn TransferTarget>) {
        let id = target.id();
        if self.requested_downloads.iter().any(|t| t.id() == id) {
            return;
        }
        self.requested_downloads.push(target);
    }

    /// Takes every pending clear and upload in recording order: texture clears, texture
    /// uploads, buffer clears, buffer uploads.
    pub fn drain_uploads(&mut self) -> Vec<(TransferRequest, Arc<dyn TransferTarget>)> {
        let clears = std::mem::take(&mut self.clears);
        let uploads = std::mem::take(&mut self.uploads);

        let mut batch = Vec::with_capacity(clears.len() + uploads.len());
        for kind in [ResourceKind::Texture, ResourceKind::Buffer] {
            batch.extend(
                clears.values()
                    .filter(|t| t.kind() == kind)
                    .map(|t| (TransferRequest::Clear, t.clone())),
            );
            batch.extend(
                uploads.values()
                    .filter(|t| t.kind() == kind)
                    .map(|t| (TransferRequest::Upload, t.clone())),
            );
        }
        batch
    }

    /// Moves the requested downloads into `slot` and returns them for recording.
    pub fn begin_downloads(&mut self, slot: usize) -> Vec<Arc<dyn TransferTarget>> {
        debug_assert!(
            self.in_flight_downloads[slot].is_empty(),
            "Downloads of slot {} were never reported",
            slot,
        );
        let requested = std::mem::take(&mut self.requested_downloads);
        self.in_flight_downloads[slot].extend(requested.iter().cloned());
        requested
    }

    pub fn has_in_flight_downloads(&self, slot: usize) -> bool {
        !self.in_flight_downloads[slot].is_empty()
    }

    /// Notifies every download recorded in `slot`. Only call once the slot's fence is
    /// signaled.
    pub fn complete_downloads(&mut self, slot: usize) -> usize {
        let completed = std::mem::take(&mut self.in_flight_downloads[slot]);
        for target in &completed {
            target.notify_download_ready(slot);
        }
        completed.len()
    }

    /// Drops every request that references `id`, including downloads already in flight.
    /// Call before destroying a resource that has outstanding requests.
    pub fn remove_requests(&mut self, id: ResourceId) -> bool {
        let mut removed = self.clears.remove(&id).is_some();
        removed |= self.uploads.remove(&id).is_some();

        let before = self.requested_downloads.len();
        self.requested_downloads.retain(|t| t.id() != id);
        removed |= self.requested_downloads.len() != before;

        for downloads in &mut self.in_flight_downloads {
            let before = downloads.len();
            downloads.retain(|t| t.id() != id);
            removed |= downloads.len() != before;
        }
        removed
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.clears.is_empty() || !self.uploads.is_empty()
    }

    pub fn pending_clears(&self) -> Vec<ResourceId> {
        self.clears.keys().copied().collect()
    }

    pub fn pending_uploads(&self) -> Vec<ResourceId> {
        self.uploads.keys().copied().collect()
    }

    pub fn pending_downloads(&self) -> Vec<ResourceId> {
        self.requested_downloads.iter().map(|t| t.id()).collect()
    }

    pub fn in_flight_download_count(&self, slot: usize) -> usize {
        self.in_flight_downloads[slot].len()
    }
}
