//! Fence-driven recycling of short-lived GPU objects.
//!
//! A rendering engine burns through command buffers, descriptor-table
//! regions and transient upload memory every frame. None of them may be
//! touched by the CPU while the GPU still reads them, and none of them are
//! worth re-creating every frame. This crate owns that lifecycle: recyclers
//! hand out ready objects, submissions tag everything they touched with a
//! fence value, and a retirement queue returns objects to their recyclers
//! once that value is observed reached.
//!
//! The GPU itself sits behind the [`backend::GpuBackend`] trait; every
//! handle the crate manages is an opaque associated type of that trait.

pub mod backend;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fence;
pub mod queue;
pub mod retire;
pub mod state;
pub mod upload;

#[cfg(test)]
pub(crate) mod sim;

pub use backend::{BackendError, GpuBackend};
pub use config::{DescriptorConfig, QueueConfig, RecycleConfig, UploadConfig};
pub use device::Device;
pub use error::{Error, Result};
