use std::fmt;

use crate::descriptor::DescriptorKind;
use crate::state::{ResourceId, ResourceState};

/// Fatal failure reported by a backend `create_*` call.
#[derive(Debug)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

/// The vendor API boundary.
///
/// Every GPU-side object this crate recycles is an opaque handle owned by
/// the wrapper types in [`fence`](crate::fence), [`command`](crate::command),
/// [`descriptor`](crate::descriptor) and [`upload`](crate::upload); the
/// backend only ever sees the handles it created itself. Creation is
/// fallible and treated as fatal by the callers; everything else is assumed
/// to succeed or abort inside the backend.
///
/// `wait_fence` is the single blocking operation and is only reached from
/// [`RetirementQueue::drain_blocking`](crate::retire::RetirementQueue::drain_blocking).
pub trait GpuBackend: fmt::Debug + Send + Sync + 'static {
    type Fence: fmt::Debug + Send;
    type CommandBuffer: fmt::Debug + Send;
    type DescriptorPool: fmt::Debug + Send + Sync;
    type UploadPage: fmt::Debug + Send;

    fn create_fence(&self) -> Result<Self::Fence, BackendError>;

    /// Returns the fence's completion counter to the unsignaled state so the
    /// handle can serve a fresh sequence of target values.
    fn reset_fence(&self, fence: &Self::Fence);

    /// Current value of the fence's monotonic completion counter.
    fn fence_completed(&self, fence: &Self::Fence) -> u64;

    /// Blocks the calling thread until the completion counter reaches
    /// `value`.
    fn wait_fence(&self, fence: &Self::Fence, value: u64);

    fn create_command_buffer(&self) -> Result<Self::CommandBuffer, BackendError>;

    /// Discards all GPU-side storage retained by the buffer's previous
    /// recording. Only valid once that recording has retired.
    fn reset_command_buffer(&self, buffer: &Self::CommandBuffer);

    /// Starts recording with a record-once, submit-once usage hint.
    fn begin_command_buffer(&self, buffer: &Self::CommandBuffer, label: &str);

    fn end_command_buffer(&self, buffer: &Self::CommandBuffer);

    /// Hands the recorded buffer to the hardware queue and schedules `fence`
    /// to be signaled to `value` when the submitted work completes.
    fn submit(&self, buffer: &Self::CommandBuffer, fence: &Self::Fence, value: u64);

    /// Creates a GPU-visible binding-table pool holding `capacity` entries
    /// of the given kind.
    fn create_descriptor_pool(
        &self,
        kind: DescriptorKind,
        capacity: u32,
    ) -> Result<Self::DescriptorPool, BackendError>;

    /// Creates a CPU-writable, GPU-readable page of `len` bytes for
    /// transient uploads.
    fn create_upload_page(&self, len: u64) -> Result<Self::UploadPage, BackendError>;

    /// Records a transition barrier for `resource` into the buffer.
    fn cmd_transition(
        &self,
        buffer: &Self::CommandBuffer,
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    );
}
