use serde::{Deserialize, Serialize};

/// Construction-time settings for the whole subsystem. Supplied once; there
/// is no runtime reconfiguration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecycleConfig {
    pub queue: QueueConfig,
    pub descriptors: DescriptorConfig,
    pub upload: UploadConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of submissions that may be awaiting retirement at
    /// once. Must be at least 1; acquiring past the limit fails instead of
    /// stalling.
    pub max_in_flight: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_in_flight: 3 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Entries per chunk. Also the hard ceiling for a single region request.
    pub chunk_entries: u32,
    /// Chunks carved out of each backend pool.
    pub chunks_per_pool: u32,
    /// Hard cap on pool growth per kind; `None` grows without bound.
    pub max_pools: Option<u32>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            chunk_entries: 1024,
            chunks_per_pool: 4,
            max_pools: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes per transient upload page. Also the hard ceiling for a single
    /// allocation.
    pub page_size: u64,
    /// Hard cap on page growth; `None` grows without bound.
    pub max_pages: Option<u32>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            page_size: 1 << 20,
            max_pages: None,
        }
    }
}
