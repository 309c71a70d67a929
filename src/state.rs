use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atomig::{Atom, Atomic};
use bitflags::bitflags;
use parking_lot::RwLock;
#[cfg(debug_assertions)]
use tracing::error;

use crate::backend::GpuBackend;
use crate::command::RecordingBuffer;
use crate::device::Device;

bitflags! {
    /// Last known GPU usage state of a tracked resource.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// Externally managed. Automatic tracking never writes this state
        /// and never emits barriers for resources carrying it.
        const UNKNOWN = 0;
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const CONSTANT_BUFFER = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const RENDER_TARGET = 1 << 5;
        const DEPTH_WRITE = 1 << 6;
        const DEPTH_READ = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 8;
        const COPY_DST = 1 << 9;
        const COPY_SRC = 1 << 10;
        const PRESENT = 1 << 11;
    }
}

impl ResourceState {
    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }
}

impl Atom for ResourceState {
    type Repr = u32;

    fn pack(self) -> u32 {
        self.bits()
    }

    fn unpack(src: u32) -> Self {
        Self::from_bits_retain(src)
    }
}

/// Identity of a tracked resource, assigned by [`ResourceStateTracker::track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

/// How a resource access interacts with automatic state management.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionMode {
    /// Full trust in caller-managed state: no read, no write, no barrier.
    None,
    /// Transition to the required state, emitting a barrier when the
    /// recorded state is known and differs.
    Transition,
    /// Read-only check that the recorded state already matches. Development
    /// builds report a mismatch as a logic error; nothing is corrected.
    Verify,
}

#[derive(Debug)]
struct StateEntry {
    state: Atomic<ResourceState>,
    generation: AtomicU64,
}

/// Per-resource state machine deciding when transition barriers are needed.
///
/// `Transition` accesses mutate the entry and must not race other accesses
/// to the same resource; callers serialize them. `Verify` accesses only load
/// the atomic state cell and may run concurrently with each other.
#[derive(Debug)]
pub struct ResourceStateTracker<B: GpuBackend>(Arc<ResourceStateTrackerInner<B>>);

#[derive(Debug)]
pub struct ResourceStateTrackerInner<B: GpuBackend> {
    device: Device<B>,
    entries: RwLock<HashMap<ResourceId, StateEntry>>,
    next_id: AtomicU64,
}

impl<B: GpuBackend> ResourceStateTracker<B> {
    pub(crate) fn inner_new(device: Device<B>) -> Self {
        Self(Arc::new(ResourceStateTrackerInner {
            device,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }))
    }

    /// Starts tracking a resource in the given state. `UNKNOWN` leaves the
    /// resource fully caller-managed.
    pub fn track(&self, initial: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().insert(
            id,
            StateEntry {
                state: Atomic::new(initial),
                generation: AtomicU64::new(0),
            },
        );
        id
    }

    /// Stops tracking; called when the resource is destroyed.
    pub fn untrack(&self, id: ResourceId) {
        self.entries.write().remove(&id);
    }

    pub fn current(&self, id: ResourceId) -> Option<ResourceState> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.state.load(Ordering::Acquire))
    }

    /// Number of times automatic management has rewritten the entry.
    pub fn generation(&self, id: ResourceId) -> Option<u64> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.generation.load(Ordering::Relaxed))
    }

    /// Hands the resource over to caller-managed state. From here on the
    /// tracker never writes the entry; only explicit or verify-only accesses
    /// make sense.
    pub fn make_external(&self, id: ResourceId) {
        if let Some(entry) = self.entries.read().get(&id) {
            entry.state.store(ResourceState::UNKNOWN, Ordering::Release);
        }
    }

    /// Consults and, in `Transition` mode, updates the recorded state for
    /// one resource access, recording a barrier into `cmd` when one is
    /// needed. Repeating the same required state is a no-op.
    pub fn ensure(
        &self,
        cmd: &RecordingBuffer<B>,
        id: ResourceId,
        required: ResourceState,
        mode: TransitionMode,
    ) {
        match mode {
            TransitionMode::None => {}
            TransitionMode::Transition => {
                let entries = self.entries.read();
                let Some(entry) = entries.get(&id) else {
                    debug_assert!(false, "state transition requested for an untracked resource");
                    return;
                };
                let current = entry.state.load(Ordering::Acquire);
                if current.is_unknown() || current == required {
                    return;
                }
                self.device
                    .backend()
                    .cmd_transition(cmd.raw(), id, current, required);
                entry.state.store(required, Ordering::Release);
                entry.generation.fetch_add(1, Ordering::Relaxed);
            }
            // The whole check compiles out of release builds; misuse is a
            // development-time contract, not a runtime-checked one.
            #[cfg(debug_assertions)]
            TransitionMode::Verify => {
                let entries = self.entries.read();
                let Some(entry) = entries.get(&id) else {
                    debug_assert!(false, "state verification requested for an untracked resource");
                    return;
                };
                let current = entry.state.load(Ordering::Acquire);
                if current.is_unknown() || current == required {
                    return;
                }
                error!(
                    resource = ?id,
                    expected = ?required,
                    actual = ?current,
                    "resource state verification failed"
                );
                debug_assert_eq!(
                    current, required,
                    "resource state verification failed"
                );
            }
            #[cfg(not(debug_assertions))]
            TransitionMode::Verify => {}
        }
    }
}

impl<B: GpuBackend> Clone for ResourceStateTracker<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for ResourceStateTracker<B> {
    type Target = ResourceStateTrackerInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
