use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::backend::GpuBackend;
use crate::config::DescriptorConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::retire::StaleObject;

/// GPU-visible binding-table kinds. Each kind draws from its own pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorKind {
    ShaderResource,
    Sampler,
}

impl DescriptorKind {
    pub(crate) const COUNT: usize = 2;

    pub(crate) fn index(self) -> usize {
        match self {
            DescriptorKind::ShaderResource => 0,
            DescriptorKind::Sampler => 1,
        }
    }
}

/// A fixed-size slice of one backend pool, sub-allocated by bumping a
/// cursor. Chunks cycle through the allocator indefinitely; the cursor is
/// reset when the chunk's last frame retires.
#[derive(Debug)]
pub struct DescriptorChunk {
    kind: DescriptorKind,
    pool: u32,
    base: u32,
    capacity: u32,
    cursor: u32,
}

impl DescriptorChunk {
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }

    fn bump(&mut self, count: u32) -> Option<DescriptorRegion> {
        if count > self.remaining() {
            return None;
        }
        let first = self.base + self.cursor;
        self.cursor += count;
        Some(DescriptorRegion {
            kind: self.kind,
            pool: self.pool,
            first,
            count,
        })
    }
}

/// A contiguous run of entries inside one backend pool. Valid until the
/// frame that requested it retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorRegion {
    pub kind: DescriptorKind,
    /// Index of the owning backend pool for this kind.
    pub pool: u32,
    /// First entry of the region, relative to the pool start.
    pub first: u32,
    pub count: u32,
}

#[derive(Debug)]
struct KindPool<B: GpuBackend> {
    pools: Vec<B::DescriptorPool>,
    free: Vec<DescriptorChunk>,
}

impl<B: GpuBackend> KindPool<B> {
    fn new() -> Self {
        Self {
            pools: Vec::new(),
            free: Vec::new(),
        }
    }
}

/// Shared chunk pool for all binding-table kinds.
///
/// The hot allocation path lives in [`DescriptorStream`]; the allocator only
/// holds the mutex-guarded free lists and grows pools when they run dry.
#[derive(Debug)]
pub struct DescriptorChunkAllocator<B: GpuBackend>(Arc<DescriptorChunkAllocatorInner<B>>);

#[derive(Debug)]
pub struct DescriptorChunkAllocatorInner<B: GpuBackend> {
    device: Device<B>,
    config: DescriptorConfig,
    kinds: [Mutex<KindPool<B>>; DescriptorKind::COUNT],
}

impl<B: GpuBackend> DescriptorChunkAllocator<B> {
    pub(crate) fn inner_new(device: Device<B>, config: DescriptorConfig) -> Self {
        Self(Arc::new(DescriptorChunkAllocatorInner {
            device,
            config,
            kinds: [Mutex::new(KindPool::new()), Mutex::new(KindPool::new())],
        }))
    }

    /// Entries per chunk; also the ceiling for one region request.
    pub fn chunk_entries(&self) -> u32 {
        self.config.chunk_entries
    }

    /// Each submission context records through its own stream; streams share
    /// this allocator's pools.
    pub fn create_stream(&self) -> DescriptorStream<B> {
        DescriptorStream {
            alloc: self.clone(),
            active: [None, None],
            touched: SmallVec::new(),
        }
    }

    /// Pops a free chunk or grows the pool set for `kind`. Growth past the
    /// configured cap fails; nothing ever stalls waiting for retirement.
    pub(crate) fn acquire_chunk(&self, kind: DescriptorKind) -> Result<DescriptorChunk> {
        let mut kind_pool = self.kinds[kind.index()].lock();
        if let Some(chunk) = kind_pool.free.pop() {
            return Ok(chunk);
        }

        if let Some(limit) = self.config.max_pools {
            if kind_pool.pools.len() as u32 >= limit {
                return Err(Error::DescriptorPoolCap { limit });
            }
        }

        let entries = self.config.chunk_entries;
        let per_pool = self.config.chunks_per_pool;
        let pool = self
            .device
            .backend()
            .create_descriptor_pool(kind, entries * per_pool)?;
        let pool_index = kind_pool.pools.len() as u32;
        kind_pool.pools.push(pool);
        warn!(?kind, pools = kind_pool.pools.len(), "descriptor pool grown");

        for chunk in (1..per_pool).rev() {
            kind_pool.free.push(DescriptorChunk {
                kind,
                pool: pool_index,
                base: chunk * entries,
                capacity: entries,
                cursor: 0,
            });
        }
        Ok(DescriptorChunk {
            kind,
            pool: pool_index,
            base: 0,
            capacity: entries,
            cursor: 0,
        })
    }

    /// Resets the cursor and returns the chunk to the free list. Called by
    /// the retirement sweep, or directly for chunks that never reached the
    /// GPU.
    pub(crate) fn recycle(&self, mut chunk: DescriptorChunk) {
        chunk.cursor = 0;
        self.kinds[chunk.kind.index()].lock().free.push(chunk);
    }

    /// Number of backend pools created for `kind`.
    pub fn pool_count(&self, kind: DescriptorKind) -> usize {
        self.kinds[kind.index()].lock().pools.len()
    }

    /// Number of chunks currently on the free list for `kind`.
    pub fn free_chunks(&self, kind: DescriptorKind) -> usize {
        self.kinds[kind.index()].lock().free.len()
    }

    #[cfg(test)]
    pub(crate) fn free_chunk_bases(&self, kind: DescriptorKind) -> Vec<(u32, u32)> {
        self.kinds[kind.index()]
            .lock()
            .free
            .iter()
            .map(|chunk| (chunk.pool, chunk.base))
            .collect()
    }
}

impl<B: GpuBackend> Clone for DescriptorChunkAllocator<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for DescriptorChunkAllocator<B> {
    type Target = DescriptorChunkAllocatorInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-submission-context cursor over the shared chunk pools.
///
/// A stream is owned by exactly one recording context; while the active
/// chunk has capacity, `request_region` touches no lock. Streams must not be
/// shared between threads recording concurrently.
#[derive(Debug)]
pub struct DescriptorStream<B: GpuBackend> {
    alloc: DescriptorChunkAllocator<B>,
    active: [Option<DescriptorChunk>; DescriptorKind::COUNT],
    touched: SmallVec<[DescriptorChunk; 4]>,
}

impl<B: GpuBackend> DescriptorStream<B> {
    pub fn begin_frame(&mut self) {
        debug_assert!(
            self.touched.is_empty(),
            "previous frame was never ended; its chunks were not retired"
        );
    }

    /// Bump-allocates `count` entries inside the active chunk for `kind`.
    ///
    /// On overflow the active chunk is retired to the frame's touched list
    /// and exactly one fresh chunk is acquired; regions never span chunk
    /// boundaries. Requests larger than a whole chunk are rejected.
    pub fn request_region(&mut self, count: u32, kind: DescriptorKind) -> Result<DescriptorRegion> {
        let capacity = self.alloc.chunk_entries();
        if count > capacity {
            return Err(Error::RegionTooLarge {
                requested: count as u64,
                capacity: capacity as u64,
            });
        }

        let slot = kind.index();
        if self.active[slot].is_none() {
            self.active[slot] = Some(self.alloc.acquire_chunk(kind)?);
        }
        if let Some(region) = self.active[slot].as_mut().and_then(|chunk| chunk.bump(count)) {
            return Ok(region);
        }

        if let Some(full) = self.active[slot].take() {
            self.touched.push(full);
        }
        let mut fresh = self.alloc.acquire_chunk(kind)?;
        let region = fresh.bump(count).ok_or(Error::RegionTooLarge {
            requested: count as u64,
            capacity: capacity as u64,
        });
        self.active[slot] = Some(fresh);
        debug!(?kind, "descriptor chunk rotated");
        region
    }

    /// Hands back every chunk touched this frame. The caller passes the
    /// result to `SubmissionQueue::submit`, which tags the chunks with the
    /// frame's fence value; none of them is reused before that value is
    /// reached. Chunks that were acquired but never written go straight back
    /// to the free list.
    pub fn end_frame(&mut self) -> SmallVec<[StaleObject<B>; 4]> {
        let mut stale: SmallVec<[StaleObject<B>; 4]> = SmallVec::new();
        for chunk in self.touched.drain(..) {
            stale.push(StaleObject::descriptor_chunk(chunk, self.alloc.clone()));
        }
        for slot in self.active.iter_mut() {
            if let Some(chunk) = slot.take() {
                if chunk.cursor > 0 {
                    stale.push(StaleObject::descriptor_chunk(chunk, self.alloc.clone()));
                } else {
                    self.alloc.recycle(chunk);
                }
            }
        }
        stale
    }
}

impl<B: GpuBackend> Drop for DescriptorStream<B> {
    fn drop(&mut self) {
        // A stream dropped mid-frame never submitted, so its chunks carry no
        // GPU reference and can skip retirement.
        for chunk in self.touched.drain(..) {
            self.alloc.recycle(chunk);
        }
        for slot in self.active.iter_mut() {
            if let Some(chunk) = slot.take() {
                self.alloc.recycle(chunk);
            }
        }
    }
}
