use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::backend::GpuBackend;
use crate::command::{CommandBuffer, CommandBufferRecycler};
use crate::descriptor::{DescriptorChunk, DescriptorChunkAllocator};
use crate::device::Device;
use crate::fence::{Fence, FenceRecycler};
use crate::upload::{UploadHeap, UploadPage};

/// An object whose submitted GPU work may still be in flight, paired with a
/// handle to the recycler that owns it. Consumed exactly once, when the
/// record it was registered under retires.
#[derive(Debug)]
pub struct StaleObject<B: GpuBackend>(StalePayload<B>);

#[derive(Debug)]
enum StalePayload<B: GpuBackend> {
    CommandBuffer {
        buffer: CommandBuffer<B>,
        home: CommandBufferRecycler<B>,
    },
    DescriptorChunk {
        chunk: DescriptorChunk,
        home: DescriptorChunkAllocator<B>,
    },
    UploadPage {
        page: UploadPage<B>,
        home: UploadHeap<B>,
    },
}

impl<B: GpuBackend> StaleObject<B> {
    pub(crate) fn command_buffer(buffer: CommandBuffer<B>, home: CommandBufferRecycler<B>) -> Self {
        Self(StalePayload::CommandBuffer { buffer, home })
    }

    pub(crate) fn descriptor_chunk(
        chunk: DescriptorChunk,
        home: DescriptorChunkAllocator<B>,
    ) -> Self {
        Self(StalePayload::DescriptorChunk { chunk, home })
    }

    pub(crate) fn upload_page(page: UploadPage<B>, home: UploadHeap<B>) -> Self {
        Self(StalePayload::UploadPage { page, home })
    }

    fn release(self) {
        match self.0 {
            StalePayload::CommandBuffer { buffer, home } => home.release(buffer),
            StalePayload::DescriptorChunk { chunk, home } => home.recycle(chunk),
            StalePayload::UploadPage { page, home } => home.recycle(page),
        }
    }
}

#[derive(Debug)]
struct RetirementRecord<B: GpuBackend> {
    fence: Fence<B>,
    value: u64,
    stale: SmallVec<[StaleObject<B>; 4]>,
}

/// Fence-ordered release queue for one submission queue.
///
/// Records are registered in submission order; because later submissions on
/// a queue cannot complete before earlier ones, the sweep only ever inspects
/// the front of the queue.
#[derive(Debug)]
pub struct RetirementQueue<B: GpuBackend>(Arc<RetirementQueueInner<B>>);

#[derive(Debug)]
pub struct RetirementQueueInner<B: GpuBackend> {
    device: Device<B>,
    fences: FenceRecycler<B>,
    records: Mutex<VecDeque<RetirementRecord<B>>>,
}

impl<B: GpuBackend> RetirementQueue<B> {
    pub(crate) fn inner_new(device: Device<B>, fences: FenceRecycler<B>) -> Self {
        Self(Arc::new(RetirementQueueInner {
            device,
            fences,
            records: Mutex::new(VecDeque::new()),
        }))
    }

    /// Appends a record for a submission that will signal `fence` to
    /// `value`. Callers register in submission order.
    pub(crate) fn register(
        &self,
        fence: Fence<B>,
        value: u64,
        stale: SmallVec<[StaleObject<B>; 4]>,
    ) {
        debug_assert_eq!(fence.target(), value);
        let mut records = self.records.lock();
        debug_assert!(
            records.back().map_or(true, |record| record.value < value),
            "retirement records must be registered with increasing fence values"
        );
        records.push_back(RetirementRecord {
            fence,
            value,
            stale,
        });
    }

    /// Non-blocking poll. Releases every record at the front of the queue
    /// whose fence value has been reached, stopping at the first that has
    /// not; nothing behind it can have completed either. Returns the number
    /// of records retired.
    pub fn sweep(&self) -> usize {
        let backend = self.device.backend();
        let mut retired = 0;

        loop {
            let record = {
                let mut records = self.records.lock();
                let reached = records
                    .front()
                    .is_some_and(|record| backend.fence_completed(&record.fence.raw) >= record.value);
                if !reached {
                    break;
                }
                records.pop_front()
            };
            let Some(record) = record else { break };

            trace!(value = record.value, objects = record.stale.len(), "retired");
            let RetirementRecord { fence, stale, .. } = record;
            for object in stale {
                object.release();
            }
            self.fences.release(fence);
            retired += 1;
        }

        retired
    }

    /// Shutdown path: host-waits each remaining record's fence to its target
    /// value, in submission order, then releases everything. The only
    /// blocking operation in the subsystem.
    pub fn drain_blocking(&self) {
        let backend = self.device.backend();

        loop {
            let record = self.records.lock().pop_front();
            let Some(record) = record else { break };

            backend.wait_fence(&record.fence.raw, record.value);
            let RetirementRecord { fence, stale, .. } = record;
            for object in stale {
                object.release();
            }
            self.fences.release(fence);
        }
    }

    /// Number of submissions still awaiting retirement.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl<B: GpuBackend> Clone for RetirementQueue<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for RetirementQueue<B> {
    type Target = RetirementQueueInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use smallvec::SmallVec;

    use super::*;
    use crate::config::DescriptorConfig;
    use crate::descriptor::DescriptorKind;
    use crate::sim::SimBackend;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<RetirementQueue<SimBackend>>();
    const _: () = is_send::<StaleObject<SimBackend>>();
    const fn is_send<T: Send>() {}

    fn queue_with_fences(
        device: &Device<SimBackend>,
    ) -> (RetirementQueue<SimBackend>, FenceRecycler<SimBackend>) {
        let fences = FenceRecycler::inner_new(device.clone());
        let retire = RetirementQueue::inner_new(device.clone(), fences.clone());
        (retire, fences)
    }

    fn register_empty(
        retire: &RetirementQueue<SimBackend>,
        fences: &FenceRecycler<SimBackend>,
        device: &Device<SimBackend>,
        value: u64,
    ) {
        let mut fence = fences.acquire().unwrap();
        fence.set_target(value);
        // Stand in for a real submission signaling this fence.
        device.backend().track_signal(&fence.raw, value);
        retire.register(fence, value, SmallVec::new());
    }

    #[test]
    fn sweep_stops_at_the_first_unreached_record() {
        let device = Device::new(SimBackend::default());
        let (retire, fences) = queue_with_fences(&device);

        for value in 1..=3 {
            register_empty(&retire, &fences, &device, value);
        }
        assert_eq!(retire.sweep(), 0);

        device.backend().complete_up_to(2);
        assert_eq!(retire.sweep(), 2);
        assert_eq!(retire.len(), 1);

        device.backend().complete_up_to(3);
        assert_eq!(retire.sweep(), 1);
        assert!(retire.is_empty());
    }

    #[test]
    fn retired_fences_return_to_their_recycler() {
        let device = Device::new(SimBackend::default());
        let (retire, fences) = queue_with_fences(&device);

        register_empty(&retire, &fences, &device, 1);
        device.backend().complete_up_to(1);
        retire.sweep();

        // The recycled fence serves the next acquire without a new creation.
        let fence = fences.acquire().unwrap();
        assert_eq!(fences.created(), 1);
        fences.release(fence);
    }

    #[test]
    fn chunks_retire_in_submission_order() {
        let device = Device::new(SimBackend::default());
        let (retire, fences) = queue_with_fences(&device);
        let alloc = device.create_descriptor_allocator(&DescriptorConfig {
            chunk_entries: 128,
            chunks_per_pool: 2,
            max_pools: None,
        });

        // Four 64-entry regions from 128-entry chunks: two fit chunk A, the
        // third rotates onto chunk B.
        let mut stream = alloc.create_stream();
        stream.begin_frame();
        for _ in 0..4 {
            stream
                .request_region(64, DescriptorKind::ShaderResource)
                .unwrap();
        }
        let stale = stream.end_frame();
        assert_eq!(stale.len(), 2);

        let mut fence = fences.acquire().unwrap();
        fence.set_target(1);
        device.backend().track_signal(&fence.raw, 1);
        retire.register(fence, 1, stale);

        assert_eq!(alloc.free_chunks(DescriptorKind::ShaderResource), 0);
        device.backend().complete_up_to(1);
        retire.sweep();

        // Chunk A (pool offset 0) hits the free list before chunk B.
        assert_eq!(alloc.free_chunk_bases(DescriptorKind::ShaderResource), vec![(0, 0), (0, 128)]);
    }

    #[test]
    fn drain_blocking_waits_for_straggling_values() {
        let device = Device::new(SimBackend::default());
        let (retire, fences) = queue_with_fences(&device);

        for value in 1..=2 {
            register_empty(&retire, &fences, &device, value);
        }

        let backend_device = device.clone();
        std::thread::scope(|scope| {
            scope.spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                backend_device.backend().complete_up_to(2);
            });
            retire.drain_blocking();
        });
        assert!(retire.is_empty());
    }
}
