use crate::renderer::util::previous_slot;

/// A deferred destroy action. Runs exactly once.
pub type Destructor = Box<dyn FnOnce() + Send>;

/// Per-slot lists of destroy actions that wait for the GPU to let go of a resource.
///
/// An action queued while a frame is open belongs to the current slot. Outside of a
/// frame it belongs to the previous slot, which is the most recent one to have been
/// submitted. Either way the action runs after the next wait on that slot's fence.
pub struct DestructionQueue {
    segments: Vec<Vec<Destructor>>,
    immediate: bool,
}

impl DestructionQueue {
    pub fn new(slot_count: usize, immediate: bool) -> Self {
        Self {
            segments: (0..slot_count).map(|_| Vec::new()).collect(),
            immediate,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.immediate
    }

    /// While immediate, nothing can be in flight and queued actions run on the spot.
    pub fn set_immediate(&mut self, immediate: bool) {
        self.immediate = immediate;
    }

    pub fn owning_slot(&self, current_slot: usize, mid_frame: bool) -> usize {
        if mid_frame {
            current_slot
        } else {
            previous_slot(current_slot, self.segments.len())
        }
    }

    pub fn queue(&mut self, current_slot: usize, mid_frame: bool, destructor: Destructor) {
        if self.immediate {
            destructor();
            return;
        }

        let slot = self.owning_slot(current_slot, mid_frame);
        self.segments[slot].push(destructor);
    }

    /// Appends to `slot` directly. Used while recording into that slot.
    pub fn queue_on(&mut self, slot: usize, destructor: Destructor) {
        if self.immediate {
            destructor();
            return;
        }

        self.segments[slot].push(destructor);
    }

    /// Runs and drops every action of `slot`. The caller must have observed the slot's
    /// fence as signaled.
    pub fn process(&mut self, slot: usize) -> usize {
        let destructors = std::mem::take(&mut self.segments[slot]);
        let count = destructors.len();
        for destructor in destructors {
            destructor();
        }
        count
    }

    pub fn process_all(&mut self) -> usize {
        (0..self.segments.len())
            .map(|slot| self.process(slot))
            .sum()
    }

    pub fn pending(&self, slot: usize) -> usize {
        self.segments[slot].len()
    }

    pub fn total_pending(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }
}
