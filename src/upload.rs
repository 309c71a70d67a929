use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::backend::GpuBackend;
use crate::config::UploadConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::retire::StaleObject;

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

/// A CPU-writable page of transient upload memory, bump-allocated within a
/// frame and recycled whole once that frame's GPU work retires.
#[derive(Debug)]
pub struct UploadPage<B: GpuBackend> {
    raw: B::UploadPage,
    id: u32,
    len: u64,
    cursor: u64,
}

impl<B: GpuBackend> UploadPage<B> {
    pub fn raw(&self) -> &B::UploadPage {
        &self.raw
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn bump(&mut self, size: u64, alignment: u64) -> Option<UploadAllocation> {
        let offset = align_up(self.cursor, alignment);
        if offset + size > self.len {
            return None;
        }
        self.cursor = offset + size;
        Some(UploadAllocation {
            page: self.id,
            offset,
            size,
        })
    }
}

/// A byte range inside one upload page. Valid until the frame that
/// requested it retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadAllocation {
    /// Id of the owning page, as reported by [`UploadPage::id`].
    pub page: u32,
    pub offset: u64,
    pub size: u64,
}

/// Shared pool of upload pages.
#[derive(Debug)]
pub struct UploadHeap<B: GpuBackend>(Arc<UploadHeapInner<B>>);

#[derive(Debug)]
pub struct UploadHeapInner<B: GpuBackend> {
    device: Device<B>,
    config: UploadConfig,
    free: Mutex<Vec<UploadPage<B>>>,
    created: AtomicU32,
}

impl<B: GpuBackend> UploadHeap<B> {
    pub(crate) fn inner_new(device: Device<B>, config: UploadConfig) -> Self {
        Self(Arc::new(UploadHeapInner {
            device,
            config,
            free: Mutex::new(Vec::new()),
            created: AtomicU32::new(0),
        }))
    }

    pub fn page_size(&self) -> u64 {
        self.config.page_size
    }

    pub fn create_stream(&self) -> UploadStream<B> {
        UploadStream {
            heap: self.clone(),
            active: None,
            touched: SmallVec::new(),
        }
    }

    pub(crate) fn acquire_page(&self) -> Result<UploadPage<B>> {
        let mut free = self.free.lock();
        if let Some(page) = free.pop() {
            return Ok(page);
        }

        let created = self.created.load(Ordering::Relaxed);
        if let Some(limit) = self.config.max_pages {
            if created >= limit {
                return Err(Error::UploadPageCap { limit });
            }
        }

        let raw = self.device.backend().create_upload_page(self.config.page_size)?;
        let id = self.created.fetch_add(1, Ordering::Relaxed);
        warn!(pages = id + 1, "upload heap grown");
        Ok(UploadPage {
            raw,
            id,
            len: self.config.page_size,
            cursor: 0,
        })
    }

    /// Resets the cursor and returns the page to the free list. Called by
    /// the retirement sweep, or directly for pages that never reached the
    /// GPU.
    pub(crate) fn recycle(&self, mut page: UploadPage<B>) {
        page.cursor = 0;
        self.free.lock().push(page);
    }

    /// Number of pages ever created by this heap.
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of pages currently on the free list.
    pub fn free_pages(&self) -> usize {
        self.free.lock().len()
    }
}

impl<B: GpuBackend> Clone for UploadHeap<B> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<B: GpuBackend> Deref for UploadHeap<B> {
    type Target = UploadHeapInner<B>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-submission-context bump allocator over one active page.
///
/// Owned by a single recording context; never shared between threads.
#[derive(Debug)]
pub struct UploadStream<B: GpuBackend> {
    heap: UploadHeap<B>,
    active: Option<UploadPage<B>>,
    touched: SmallVec<[UploadPage<B>; 2]>,
}

impl<B: GpuBackend> UploadStream<B> {
    pub fn begin_frame(&mut self) {
        debug_assert!(
            self.touched.is_empty(),
            "previous frame was never ended; its pages were not retired"
        );
    }

    /// Allocates `size` bytes at the given power-of-two alignment.
    /// Allocations never span pages; a request larger than one whole page is
    /// rejected.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<UploadAllocation> {
        let page_size = self.heap.page_size();
        if size > page_size {
            return Err(Error::RegionTooLarge {
                requested: size,
                capacity: page_size,
            });
        }

        if self.active.is_none() {
            self.active = Some(self.heap.acquire_page()?);
        }
        if let Some(alloc) = self
            .active
            .as_mut()
            .and_then(|page| page.bump(size, alignment))
        {
            return Ok(alloc);
        }

        if let Some(full) = self.active.take() {
            self.touched.push(full);
        }
        let mut fresh = self.heap.acquire_page()?;
        let alloc = fresh.bump(size, alignment).ok_or(Error::RegionTooLarge {
            requested: size,
            capacity: page_size,
        });
        self.active = Some(fresh);
        debug!("upload page rotated");
        alloc
    }

    /// Hands back every page touched this frame, to be tagged with the
    /// frame's fence value at submit. Untouched pages skip retirement.
    pub fn end_frame(&mut self) -> SmallVec<[StaleObject<B>; 4]> {
        let mut stale: SmallVec<[StaleObject<B>; 4]> = SmallVec::new();
        for page in self.touched.drain(..) {
            stale.push(StaleObject::upload_page(page, self.heap.clone()));
        }
        if let Some(page) = self.active.take() {
            if page.cursor > 0 {
                stale.push(StaleObject::upload_page(page, self.heap.clone()));
            } else {
                self.heap.recycle(page);
            }
        }
        stale
    }
}

impl<B: GpuBackend> Drop for UploadStream<B> {
    fn drop(&mut self) {
        // Dropped mid-frame means nothing was submitted; pages carry no GPU
        // reference and can skip retirement.
        for page in self.touched.drain(..) {
            self.heap.recycle(page);
        }
        if let Some(page) = self.active.take() {
            self.heap.recycle(page);
        }
    }
}
