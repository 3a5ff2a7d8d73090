//! Simulated GPU backends for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use ash::vk;
use ash::vk::Handle;
use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt};
use crate::renderer::contexts::device_ctx::RenderDevice;
use crate::renderer::contexts::frame_ctx::transfer::{
    ResourceId, ResourceKind, TransferRecorder, TransferTarget,
};
use crate::renderer::contexts::pipeline_ctx::Pipeline;
use crate::renderer::contexts::pipeline_ctx::factory::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineFactory,
};
use crate::renderer::contexts::pipeline_ctx::key::{
    ComputePipelineKey, PipelineKey, SpecializationConstants,
};
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::contexts::resource_ctx::allocator::{DescriptorSetAllocator, UniformStorage};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::{
    DescriptorCounts, DescriptorSetLayoutDesc,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub fence: vk::Fence,
    pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
}

#[derive(Default)]
struct DeviceState {
    next_handle: u64,
    // State and index of the submission that will signal the fence
    fences: HashMap<vk::Fence, (FenceState, u64)>,
    recording: HashSet<vk::CommandBuffer>,
    submissions: Vec<Submission>,
    completed: u64,
    fence_waits: Vec<vk::Fence>,
    descriptor_writes: Vec<DescriptorWrite>,
    idle_waits: usize,
    lost: bool,
}

impl DeviceState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    // The queue executes in order, so completing one submission completes all before it
    fn complete_through(&mut self, index: u64) {
        self.completed = self.completed.max(index);
        let completed = self.completed;
        for (state, fence_index) in self.fences.values_mut() {
            if *state == FenceState::Pending && *fence_index <= completed {
                *state = FenceState::Signaled;
            }
        }
    }
}

/// In-order queue simulation. Submitted work only completes when a test says so or when
/// the host blocks on it.
pub struct MockDevice {
    state: Mutex<DeviceState>,
    compute: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            compute: true,
        }
    }

    pub fn without_compute(mut self) -> Self {
        self.compute = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    /// Lets the GPU catch up with everything submitted so far.
    pub fn complete_all(&self) {
        let mut state = self.state();
        let last = state.submissions.len() as u64;
        state.complete_through(last);
    }

    pub fn set_lost(&self, lost: bool) {
        self.state().lost = lost;
    }

    pub fn fence_state(&self, fence: vk::Fence) -> FenceState {
        self.state().fences[&fence].0
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn last_submission(&self) -> u64 {
        self.state().submissions.len() as u64
    }

    pub fn is_completed(&self, submission: u64) -> bool {
        self.state().completed >= submission
    }

    pub fn fence_waits(&self) -> Vec<vk::Fence> {
        self.state().fence_waits.clone()
    }

    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.state().descriptor_writes.clone()
    }

    pub fn idle_waits(&self) -> usize {
        self.state().idle_waits
    }
}

impl RenderDevice for MockDevice {
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state();
        let fence = vk::Fence::from_raw(state.handle());
        let fence_state = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        state.fences.insert(fence, (fence_state, 0));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state();
        if state.lost {
            return Err(eyre!("Device lost"));
        }
        state.fence_waits.push(fence);

        let (fence_state, index) = *state.fences.get(&fence).ok_or_eyre("Unknown fence")?;
        match fence_state {
            FenceState::Signaled => Ok(()),
            FenceState::Pending => {
                state.complete_through(index);
                Ok(())
            }
            FenceState::Unsignaled => Err(eyre!("Waiting on a fence that was never submitted")),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        let state = self.state();
        let (fence_state, _) = state.fences.get(&fence).ok_or_eyre("Unknown fence")?;
        Ok(*fence_state == FenceState::Signaled)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state();
        let entry = state.fences.get_mut(&fence).ok_or_eyre("Unknown fence")?;
        if entry.0 == FenceState::Pending {
            return Err(eyre!("Reset of a fence that is still in use"));
        }
        *entry = (FenceState::Unsignaled, 0);
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.handle()))
            .collect())
    }

    fn free_command_buffers(&self, _command_buffers: &[vk::CommandBuffer]) {}

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if !self.state().recording.insert(command_buffer) {
            return Err(eyre!("Command buffer is already recording"));
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if !self.state().recording.remove(&command_buffer) {
            return Err(eyre!("Command buffer is not recording"));
        }
        Ok(())
    }

    fn submit(&self, command_buffers: &[vk::CommandBuffer], fence: vk::Fence) -> Result<()> {
        let mut state = self.state();
        if command_buffers.iter().any(|cb| state.recording.contains(cb)) {
            return Err(eyre!("Submitted command buffer is still recording"));
        }

        let index = state.submissions.len() as u64 + 1;
        if fence != vk::Fence::null() {
            let entry = state.fences.get_mut(&fence).ok_or_eyre("Unknown fence")?;
            if entry.0 != FenceState::Unsignaled {
                return Err(eyre!("Submitted fence must be unsignaled"));
            }
            *entry = (FenceState::Pending, index);
        }
        state.submissions.push(Submission {
            command_buffers: command_buffers.to_vec(),
            fence,
            index,
        });
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let mut state = self.state();
        state.descriptor_writes.extend(writes.iter().map(|write| DescriptorWrite {
            set: write.dst_set,
            binding: write.dst_binding,
            descriptor_type: write.descriptor_type,
        }));
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state();
        if state.lost {
            return Err(eyre!("Device lost"));
        }
        state.idle_waits += 1;
        let last = state.submissions.len() as u64;
        state.complete_through(last);
        Ok(())
    }

    fn supports_compute(&self) -> bool {
        self.compute
    }
}

struct MockUniform {
    buffer: vk::Buffer,
    size: u64,
    contents: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl UniformStorage for MockUniform {
    fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.size {
            return Err(eyre!("Uniform data does not fit buffer"));
        }
        *self.contents.lock().unwrap() = data.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockUniform {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockDescriptorAllocator {
    next_handle: u64,
    capacity: Option<usize>,
    failing_uniforms: bool,
    allocated: usize,
    uniforms: Vec<Arc<Mutex<Vec<u8>>>>,
    uniform_writes: Arc<AtomicUsize>,
    live_uniforms: Arc<AtomicUsize>,
}

impl MockDescriptorAllocator {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            capacity: None,
            failing_uniforms: false,
            allocated: 0,
            uniforms: Vec::new(),
            uniform_writes: Arc::new(AtomicUsize::new(0)),
            live_uniforms: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails every allocation past `capacity` live sets.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_failing_uniforms(mut self) -> Self {
        self.failing_uniforms = true;
        self
    }

    pub fn allocated_sets(&self) -> usize {
        self.allocated
    }

    pub fn uniform_contents(&self, index: usize) -> Option<Vec<u8>> {
        self.uniforms.get(index).map(|contents| contents.lock().unwrap().clone())
    }

    pub fn uniform_writes(&self) -> usize {
        self.uniform_writes.load(Ordering::SeqCst)
    }

    pub fn live_uniform_buffers(&self) -> usize {
        self.live_uniforms.load(Ordering::SeqCst)
    }
}

impl DescriptorSetAllocator for MockDescriptorAllocator {
    fn allocate_descriptor_set(&mut self, _layout: &DescriptorSetLayoutDesc) -> Result<vk::DescriptorSet> {
        if self.capacity.is_some_and(|capacity| self.allocated >= capacity) {
            return Err(eyre!("Descriptor pool exhausted"));
        }
        self.allocated += 1;
        self.next_handle += 1;
        Ok(vk::DescriptorSet::from_raw(0x1000 + self.next_handle))
    }

    fn create_uniform_buffer(&mut self, size: u64) -> Result<Box<dyn UniformStorage>> {
        if self.failing_uniforms {
            return Err(eyre!("Out of host memory"));
        }
        self.next_handle += 1;
        let contents = Arc::new(Mutex::new(Vec::new()));
        self.uniforms.push(contents.clone());
        self.live_uniforms.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockUniform {
            buffer: vk::Buffer::from_raw(0x2000 + self.next_handle),
            size,
            contents,
            writes: self.uniform_writes.clone(),
            live: self.live_uniforms.clone(),
        }))
    }

    fn free_descriptor_set(&mut self, _set: vk::DescriptorSet) {
        self.allocated -= 1;
    }

    fn release_all(&mut self) {
        self.allocated = 0;
    }
}

#[derive(Default)]
struct FactoryState {
    next_handle: u64,
    created: usize,
    destroyed: Vec<Pipeline>,
    failing: bool,
    // Constants of every stage handed to the factory, in creation order
    constants: Vec<SpecializationConstants>,
}

pub struct MockPipelineFactory {
    state: Mutex<FactoryState>,
}

impl MockPipelineFactory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FactoryState::default()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn destroyed(&self) -> Vec<Pipeline> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn received_constants(&self) -> Vec<SpecializationConstants> {
        self.state.lock().unwrap().constants.clone()
    }

    fn create(&self, constants: &[&SpecializationConstants]) -> Result<Pipeline> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(eyre!("Shader failed to compile"));
        }
        state.constants.extend(constants.iter().map(|c| (*c).clone()));
        state.created += 1;
        state.next_handle += 1;
        Ok(Pipeline {
            pipeline: vk::Pipeline::from_raw(0x3000 + state.next_handle),
            layout: vk::PipelineLayout::from_raw(0x4000 + state.next_handle),
        })
    }
}

impl PipelineFactory for MockPipelineFactory {
    fn create_graphics_pipeline(&self, _key: &PipelineKey, desc: &GraphicsPipelineDesc) -> Result<Pipeline> {
        self.create(&[&desc.vertex_constants, &desc.fragment_constants])
    }

    fn create_compute_pipeline(&self, _key: &ComputePipelineKey, desc: &ComputePipelineDesc) -> Result<Pipeline> {
        self.create(&[&desc.constants])
    }

    fn destroy_pipeline(&self, pipeline: Pipeline) {
        self.state.lock().unwrap().destroyed.push(pipeline);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Clear(usize),
    Upload(usize),
    Download(usize),
    Ready(usize),
}

/// Records which transfer callbacks ran and in which slot.
pub struct MockTarget {
    id: ResourceId,
    kind: ResourceKind,
    staging: AtomicBool,
    events: Mutex<Vec<TransferEvent>>,
    staging_destroyed: Arc<AtomicUsize>,
}

impl MockTarget {
    fn new(kind: ResourceKind) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::next(),
            kind,
            staging: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            staging_destroyed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn texture() -> Arc<Self> {
        Self::new(ResourceKind::Texture)
    }

    pub fn buffer() -> Arc<Self> {
        Self::new(ResourceKind::Buffer)
    }

    /// Uploads hand a staging buffer over for deferred destruction.
    pub fn with_staging(self: Arc<Self>) -> Arc<Self> {
        self.staging.store(true, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn staging_destroyed(&self) -> usize {
        self.staging_destroyed.load(Ordering::SeqCst)
    }

    fn push(&self, event: TransferEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl TransferTarget for MockTarget {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn record_clear(&self, recorder: &mut TransferRecorder<'_>) -> Result<()> {
        self.push(TransferEvent::Clear(recorder.slot()));
        Ok(())
    }

    fn record_upload(&self, recorder: &mut TransferRecorder<'_>) -> Result<()> {
        self.push(TransferEvent::Upload(recorder.slot()));
        if self.staging.load(Ordering::SeqCst) {
            let destroyed = self.staging_destroyed.clone();
            recorder.defer_destroy(Box::new(move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
            }));
        }
        Ok(())
    }

    fn record_download(&self, recorder: &mut TransferRecorder<'_>) -> Result<()> {
        self.push(TransferEvent::Download(recorder.slot()));
        Ok(())
    }

    fn notify_download_ready(&self, slot: usize) {
        self.push(TransferEvent::Ready(slot));
    }
}

pub fn test_layout(raw: u64) -> DescriptorSetLayoutDesc {
    DescriptorSetLayoutDesc {
        layout: vk::DescriptorSetLayout::from_raw(raw),
        counts: DescriptorCounts {
            uniform_buffer: 1,
            ..Default::default()
        },
        update_after_bind: false,
    }
}

pub fn mock_resource_context(device: &Arc<MockDevice>, slots: usize) -> RenderResourceContext {
    RenderResourceContext::new(
        device.clone(),
        Arc::new(Mutex::new(MockDescriptorAllocator::new())),
        slots,
    )
}
