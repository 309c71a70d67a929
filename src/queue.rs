use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::backend::GpuBackend;
use crate::command::{CommandBufferRecycler, RecordingBuffer};
use crate::config::QueueConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fence::FenceRecycler;
use crate::retire::{RetirementQueue, StaleObject};

/// Per-queue submission engine.
///
/// Any number of threads may record into distinct command buffers
/// concurrently; the submit path below serializes hardware submission and
/// fence-value assignment, so fence values on one queue are strictly
/// increasing. Queues are fully independent of each other: each owns its own
/// recyclers and retirement queue.
#[derive(Debug)]
pub struct SubmissionQueue<B: GpuBackend>(Arc<SubmissionQueueInner<B>>);

#[derive(Debug)]
pub struct SubmissionQueueInner<B: GpuBackend> {
    device: Device<B>,
    buffers: CommandBufferRecycler<B>,
    fences: FenceRecycler<B>,
    retire: RetirementQueue<B>,
    /// Last assigned fence value; the lock doubles as the single serialized
    /// submission path.
    serial: Mutex<u64>,
    max_in_flight: usize,
}

impl<B: GpuBackend> SubmissionQueue<B> {
    pub(crate) fn inner_new(device: Device<B>, config: &QueueConfig) -> Self {
        debug_assert!(config.max_in_flight >= 1);
        let fences = FenceRecycler::inner_new(device.clone());
        Self(Arc::new(SubmissionQueueInner {
            buffers: CommandBufferRecycler::inner_new(device.clone()),
            retire: RetirementQueue::inner_new(device.clone(), fences.clone()),
            fences,
            device,
            serial: Mutex::new(0),
            max_in_flight: config.max_in_flight,
        }))
    }

    pub fn device(&self) -> &Device<B> {
        &self.device
    }

    pub fn buffers(&self) -> &CommandBufferRecycler<B> {
        &self.buffers
    }

    pub fn retirement(&self) -> &RetirementQueue<B> {
        &self.retire
    }

    /// Sweeps opportunistically, applies backpressure, then hands out a
    /// ready-to-record buffer.
    ///
    /// When the configured in-flight limit is reached the call fails
    /// immediately instead of waiting; the caller decides whether to drain
    /// or to raise the limit.
    pub fn acquire(&self, label: &str) -> Result<RecordingBuffer<B>> {
        self.retire.sweep();
        if self.retire.len() >= self.max_in_flight {
            return Err(Error::InFlightLimit {
                limit: self.max_in_flight,
            });
        }
        self.buffers.acquire(label)
    }

    /// Submits a recording along with everything it touched this frame
    /// (descriptor chunks, upload pages). Returns the fence value that marks
    /// the submission's retirement.
    pub fn submit(
        &self,
        recording: RecordingBuffer<B>,
        stale: impl IntoIterator<Item = StaleObject<B>>,
    ) -> Result<u64> {
        let backend = self.device.backend();
        backend.end_command_buffer(recording.raw());

        let mut fence = match self.fences.acquire() {
            Ok(fence) => fence,
            Err(err) => {
                // Nothing reached the GPU; the recording is reusable as-is.
                self.buffers.discard(recording);
                return Err(err);
            }
        };
        let mut payload: SmallVec<[StaleObject<B>; 4]> = stale.into_iter().collect();

        let mut serial = self.serial.lock();
        *serial += 1;
        let value = *serial;
        fence.set_target(value);
        backend.submit(recording.raw(), fence.raw(), value);
        trace!(value, label = recording.label(), "submitted");

        let buffer = self.buffers.seal(recording);
        payload.push(StaleObject::command_buffer(buffer, self.buffers.clone()));
        self.retire.register(fence, value, payload);
        drop(serial);

        Ok(value)
    }

    /// Cancels a recording that was never submitted. Its buffer goes back to
    /// the free list immediately; no GPU reference was ever created.
    pub fn discard(&self, recording: RecordingBuffer<B>) {
        self.buffers.discard(recording);
    }

    /// Non-blocking retirement poll.
    pub fn sweep(&self) -> usize {
        self.retire.sweep()
    }

    /// Blocks until every registered submission has retired. Shutdown only.
    pub fn drain_blocking(&self) {
        self.retire.drain_blocking();
    }

    /// Number of submissions not yet observed complete.
    pub fn in_flight(&self) -> usize {
        self.retire.len()
    }

    /// Last fence value assigned on this queue.
    pub fn last_value(&self) -> u64 {
        *self.serial.lock()
    }
}

impl<B: GpuBackend> Clone for SubmissionQueue<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for SubmissionQueue<B> {
    type Target = SubmissionQueueInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
