use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::GpuBackend;
use crate::device::Device;
use crate::error::Result;

/// A recyclable fence together with the last target value assigned to it.
///
/// The raw handle is owned exclusively: by the recycler while on the free
/// list, by the retirement queue while its target value is in flight. It is
/// never dropped or reset while that value is unreached.
#[derive(Debug)]
pub struct Fence<B: GpuBackend> {
    pub(crate) raw: B::Fence,
    target: u64,
}

impl<B: GpuBackend> Fence<B> {
    pub fn raw(&self) -> &B::Fence {
        &self.raw
    }

    /// The value the fence must reach before its current owner may be
    /// recycled.
    pub fn target(&self) -> u64 {
        self.target
    }

    pub(crate) fn set_target(&mut self, value: u64) {
        debug_assert!(
            value >= self.target,
            "fence target values must not decrease between resets"
        );
        self.target = value;
    }
}

/// Free list of ready fences for one submission queue.
#[derive(Debug)]
pub struct FenceRecycler<B: GpuBackend>(Arc<FenceRecyclerInner<B>>);

#[derive(Debug)]
pub struct FenceRecyclerInner<B: GpuBackend> {
    device: Device<B>,
    free: Mutex<Vec<Fence<B>>>,
    created: AtomicUsize,
}

impl<B: GpuBackend> FenceRecycler<B> {
    pub(crate) fn inner_new(device: Device<B>) -> Self {
        Self(Arc::new(FenceRecyclerInner {
            device,
            free: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }))
    }

    /// Pops a ready fence, resetting its completion state, or creates a new
    /// one. Never blocks; creation failure is fatal for the device.
    pub fn acquire(&self) -> Result<Fence<B>> {
        if let Some(mut fence) = self.free.lock().pop() {
            self.device.backend().reset_fence(&fence.raw);
            fence.target = 0;
            return Ok(fence);
        }

        let raw = self.device.backend().create_fence()?;
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(total, "created fence");

        Ok(Fence { raw, target: 0 })
    }

    /// Returns a fence whose target value has been observed reached.
    pub fn release(&self, fence: Fence<B>) {
        debug_assert!(
            self.device.backend().fence_completed(&fence.raw) >= fence.target,
            "fence released before its target value was reached"
        );
        self.free.lock().push(fence);
    }

    /// Number of raw fences ever created by this recycler.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<B: GpuBackend> Clone for FenceRecycler<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for FenceRecycler<B> {
    type Target = FenceRecyclerInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;

    const fn is_send_sync<T: Send + Sync>() {}

    const _: () = is_send_sync::<FenceRecycler<SimBackend>>();

    #[test]
    fn acquire_creates_then_reuses() {
        let device = Device::new(SimBackend::default());
        let recycler = FenceRecycler::inner_new(device.clone());

        let a = recycler.acquire().unwrap();
        let b = recycler.acquire().unwrap();
        assert_ne!(a.raw, b.raw);
        assert_eq!(recycler.created(), 2);

        let a_raw = a.raw;
        recycler.release(a);
        let c = recycler.acquire().unwrap();
        assert_eq!(c.raw, a_raw);
        assert_eq!(recycler.created(), 2);
    }

    #[test]
    fn reuse_resets_completion_state() {
        let device = Device::new(SimBackend::default());
        let recycler = FenceRecycler::inner_new(device.clone());

        let mut fence = recycler.acquire().unwrap();
        fence.set_target(5);
        device.backend().signal_fence(&fence.raw, 5);
        assert_eq!(device.backend().fence_completed(&fence.raw), 5);

        recycler.release(fence);
        let fence = recycler.acquire().unwrap();
        assert_eq!(device.backend().fence_completed(&fence.raw), 0);
        assert_eq!(fence.target(), 0);
        recycler.release(fence);
    }
}
