//! Deterministic in-process backend for tests.
//!
//! Fences complete only when the test says so, which makes it possible to
//! simulate GPU completion out of call order (but always in value order) and
//! to assert that nothing is reused early.

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};

use crate::backend::{BackendError, GpuBackend};
use crate::descriptor::DescriptorKind;
use crate::state::{ResourceId, ResourceState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SimFence(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SimCommandBuffer(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SimPool(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SimPage(usize);

#[derive(Debug, Default)]
struct SimFenceState {
    completed: u64,
}

#[derive(Debug, Default)]
struct SimBufferState {
    resets: u32,
    begun: bool,
}

#[derive(Debug, Default)]
struct SimState {
    fences: Vec<SimFenceState>,
    buffers: Vec<SimBufferState>,
    pools: Vec<(DescriptorKind, u32)>,
    pages: Vec<u64>,
    /// Scheduled signals: `(fence, value)` pairs from `submit` or
    /// `track_signal`, completed by `complete_up_to`.
    scheduled: Vec<(usize, u64)>,
    barriers: Vec<(ResourceId, ResourceState, ResourceState)>,
    auto_signal: bool,
    fail_creates: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SimBackend {
    state: Mutex<SimState>,
    signaled: Condvar,
}

impl SimBackend {
    /// Backend whose submissions complete instantly.
    pub(crate) fn auto_signal() -> Self {
        let backend = Self::default();
        backend.state.lock().auto_signal = true;
        backend
    }

    /// Makes every subsequent `create_*` call fail, as a lost device would.
    pub(crate) fn fail_creates(&self, fail: bool) {
        self.state.lock().fail_creates = fail;
    }

    /// Completes every scheduled signal whose value is `<= value`. Values
    /// complete in order even when tests call this out of call order.
    pub(crate) fn complete_up_to(&self, value: u64) {
        let mut state = self.state.lock();
        for index in 0..state.scheduled.len() {
            let (fence, scheduled_value) = state.scheduled[index];
            if scheduled_value <= value && state.fences[fence].completed < scheduled_value {
                state.fences[fence].completed = scheduled_value;
            }
        }
        drop(state);
        self.signaled.notify_all();
    }

    /// Directly signals one fence, for tests that hold the handle.
    pub(crate) fn signal_fence(&self, fence: &SimFence, value: u64) {
        let mut state = self.state.lock();
        if state.fences[fence.0].completed < value {
            state.fences[fence.0].completed = value;
        }
        drop(state);
        self.signaled.notify_all();
    }

    /// Schedules a signal without a command buffer, standing in for a
    /// submission.
    pub(crate) fn track_signal(&self, fence: &SimFence, value: u64) {
        self.state.lock().scheduled.push((fence.0, value));
    }

    pub(crate) fn barriers(&self) -> Vec<(ResourceId, ResourceState, ResourceState)> {
        self.state.lock().barriers.clone()
    }

    pub(crate) fn reset_count(&self, buffer: &SimCommandBuffer) -> u32 {
        self.state.lock().buffers[buffer.0].resets
    }
}

impl GpuBackend for SimBackend {
    type Fence = SimFence;
    type CommandBuffer = SimCommandBuffer;
    type DescriptorPool = SimPool;
    type UploadPage = SimPage;

    fn create_fence(&self) -> Result<SimFence, BackendError> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return Err(BackendError::new("simulated fence exhaustion"));
        }
        state.fences.push(SimFenceState::default());
        Ok(SimFence(state.fences.len() - 1))
    }

    fn reset_fence(&self, fence: &SimFence) {
        self.state.lock().fences[fence.0].completed = 0;
    }

    fn fence_completed(&self, fence: &SimFence) -> u64 {
        self.state.lock().fences[fence.0].completed
    }

    fn wait_fence(&self, fence: &SimFence, value: u64) {
        let mut state = self.state.lock();
        while state.fences[fence.0].completed < value {
            self.signaled.wait(&mut state);
        }
    }

    fn create_command_buffer(&self) -> Result<SimCommandBuffer, BackendError> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return Err(BackendError::new("simulated command buffer exhaustion"));
        }
        state.buffers.push(SimBufferState::default());
        Ok(SimCommandBuffer(state.buffers.len() - 1))
    }

    fn reset_command_buffer(&self, buffer: &SimCommandBuffer) {
        let mut state = self.state.lock();
        let buffer = &mut state.buffers[buffer.0];
        buffer.resets += 1;
        buffer.begun = false;
    }

    fn begin_command_buffer(&self, buffer: &SimCommandBuffer, _label: &str) {
        self.state.lock().buffers[buffer.0].begun = true;
    }

    fn end_command_buffer(&self, buffer: &SimCommandBuffer) {
        self.state.lock().buffers[buffer.0].begun = false;
    }

    fn submit(&self, _buffer: &SimCommandBuffer, fence: &SimFence, value: u64) {
        let mut state = self.state.lock();
        state.scheduled.push((fence.0, value));
        if state.auto_signal && state.fences[fence.0].completed < value {
            state.fences[fence.0].completed = value;
        }
        drop(state);
        self.signaled.notify_all();
    }

    fn create_descriptor_pool(
        &self,
        kind: DescriptorKind,
        capacity: u32,
    ) -> Result<SimPool, BackendError> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return Err(BackendError::new("simulated descriptor pool exhaustion"));
        }
        state.pools.push((kind, capacity));
        Ok(SimPool(state.pools.len() - 1))
    }

    fn create_upload_page(&self, len: u64) -> Result<SimPage, BackendError> {
        let mut state = self.state.lock();
        if state.fail_creates {
            return Err(BackendError::new("simulated upload page exhaustion"));
        }
        state.pages.push(len);
        Ok(SimPage(state.pages.len() - 1))
    }

    fn cmd_transition(
        &self,
        _buffer: &SimCommandBuffer,
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    ) {
        self.state.lock().barriers.push((resource, from, to));
    }
}
