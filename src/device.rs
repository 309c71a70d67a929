use std::ops::Deref;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::config::{DescriptorConfig, QueueConfig, UploadConfig};
use crate::descriptor::DescriptorChunkAllocator;
use crate::queue::SubmissionQueue;
use crate::state::ResourceStateTracker;
use crate::upload::UploadHeap;

/// Per-device context owning the backend instance.
///
/// All pools and recyclers hang off an explicit `Device` handle passed into
/// the submission contexts that use them; there is no process-wide state.
#[derive(Debug)]
pub struct Device<B: GpuBackend>(Arc<DeviceInner<B>>);

#[derive(Debug)]
pub struct DeviceInner<B: GpuBackend> {
    backend: B,
}

impl<B: GpuBackend> Device<B> {
    pub fn new(backend: B) -> Self {
        Self(Arc::new(DeviceInner { backend }))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates an independent submission engine. Queues do not order fence
    /// values relative to each other.
    pub fn create_submission_queue(&self, config: &QueueConfig) -> SubmissionQueue<B> {
        SubmissionQueue::inner_new(self.clone(), config)
    }

    pub fn create_descriptor_allocator(
        &self,
        config: &DescriptorConfig,
    ) -> DescriptorChunkAllocator<B> {
        DescriptorChunkAllocator::inner_new(self.clone(), config.clone())
    }

    pub fn create_upload_heap(&self, config: &UploadConfig) -> UploadHeap<B> {
        UploadHeap::inner_new(self.clone(), config.clone())
    }

    pub fn create_state_tracker(&self) -> ResourceStateTracker<B> {
        ResourceStateTracker::inner_new(self.clone())
    }
}

impl<B: GpuBackend> Clone for Device<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for Device<B> {
    type Target = DeviceInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
