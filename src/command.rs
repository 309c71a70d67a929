use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::GpuBackend;
use crate::device::Device;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BufferState {
    Free,
    Recording,
    Pending,
}

/// A recyclable per-queue recording handle.
///
/// Created lazily, then cycles `Free → Recording → Pending → Free` for the
/// lifetime of its recycler. Move semantics guarantee a single holder at any
/// point in the cycle.
#[derive(Debug)]
pub struct CommandBuffer<B: GpuBackend> {
    raw: B::CommandBuffer,
    label: String,
    state: BufferState,
}

impl<B: GpuBackend> CommandBuffer<B> {
    pub fn raw(&self) -> &B::CommandBuffer {
        &self.raw
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A command buffer in the `Recording` state.
///
/// The only ways out are [`SubmissionQueue::submit`](crate::queue::SubmissionQueue::submit),
/// which moves the buffer into the retirement queue, and
/// [`SubmissionQueue::discard`](crate::queue::SubmissionQueue::discard); a
/// pending buffer can never be released by hand.
#[derive(Debug)]
pub struct RecordingBuffer<B: GpuBackend>(CommandBuffer<B>);

impl<B: GpuBackend> RecordingBuffer<B> {
    pub fn raw(&self) -> &B::CommandBuffer {
        &self.0.raw
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }
}

/// Free list of command buffers bound to one execution queue.
#[derive(Debug)]
pub struct CommandBufferRecycler<B: GpuBackend>(Arc<CommandBufferRecyclerInner<B>>);

#[derive(Debug)]
pub struct CommandBufferRecyclerInner<B: GpuBackend> {
    device: Device<B>,
    free: Mutex<VecDeque<CommandBuffer<B>>>,
    pending: AtomicUsize,
    created: AtomicUsize,
}

impl<B: GpuBackend> CommandBufferRecycler<B> {
    pub(crate) fn inner_new(device: Device<B>) -> Self {
        Self(Arc::new(CommandBufferRecyclerInner {
            device,
            free: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        }))
    }

    /// Pops a retired buffer and resets it, discarding storage retained by
    /// its previous recording, or creates a new one. Recording begins
    /// immediately; the buffer must be re-recorded before any resubmission.
    pub fn acquire(&self, label: &str) -> Result<RecordingBuffer<B>> {
        let backend = self.device.backend();

        let mut buffer = if let Some(mut buffer) = self.free.lock().pop_front() {
            backend.reset_command_buffer(&buffer.raw);
            buffer.label.clear();
            buffer.label.push_str(label);
            buffer
        } else {
            let raw = backend.create_command_buffer()?;
            let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(total, label, "created command buffer");
            CommandBuffer {
                raw,
                label: label.to_owned(),
                state: BufferState::Free,
            }
        };

        buffer.state = BufferState::Recording;
        backend.begin_command_buffer(&buffer.raw, &buffer.label);
        Ok(RecordingBuffer(buffer))
    }

    /// Moves a recording into the `Pending` state at submit time.
    pub(crate) fn seal(&self, recording: RecordingBuffer<B>) -> CommandBuffer<B> {
        let mut buffer = recording.0;
        buffer.state = BufferState::Pending;
        self.pending.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    /// Returns a never-submitted recording straight to the free list. No GPU
    /// reference exists, so nothing has to be waited on.
    pub fn discard(&self, recording: RecordingBuffer<B>) {
        let mut buffer = recording.0;
        buffer.state = BufferState::Free;
        self.free.lock().push_back(buffer);
    }

    /// Returns a buffer whose submission has retired. Only the retirement
    /// sweep calls this.
    pub(crate) fn release(&self, mut buffer: CommandBuffer<B>) {
        debug_assert_eq!(
            buffer.state,
            BufferState::Pending,
            "released a command buffer that was never submitted"
        );
        buffer.state = BufferState::Free;
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().push_back(buffer);
    }

    /// Number of buffers currently awaiting retirement.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Number of raw buffers ever created by this recycler.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<B: GpuBackend> Clone for CommandBufferRecycler<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for CommandBufferRecycler<B> {
    type Target = CommandBufferRecyclerInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B: GpuBackend> Drop for CommandBufferRecyclerInner<B> {
    fn drop(&mut self) {
        let pending = *self.pending.get_mut();
        debug_assert_eq!(
            pending, 0,
            "{} command buffer(s) still pending at teardown; a GPU reference \
             outlived its retirement and will corrupt the pool on reuse",
            pending
        );
        info!(
            created = *self.created.get_mut(),
            "command buffer recycler torn down"
        );
    }
}
