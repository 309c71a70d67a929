use std::fmt;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the recycling subsystem.
///
/// Backend exhaustion is fatal for the current device: retrying will not
/// help, the caller has to reduce the number of in-flight frames or tear the
/// device down. Capacity variants are ordinary recoverable errors; the caller
/// splits the request, drains outstanding work or raises the configured
/// limit.
#[derive(Debug)]
pub enum Error {
    /// Backend object creation failed (device loss, out of memory).
    Backend(BackendError),

    /// A single region request was larger than one whole chunk or page.
    /// Regions never span chunk boundaries; the caller must split.
    RegionTooLarge { requested: u64, capacity: u64 },

    /// Descriptor pool growth hit the configured hard cap.
    DescriptorPoolCap { limit: u32 },

    /// Upload page growth hit the configured hard cap.
    UploadPageCap { limit: u32 },

    /// The queue already has the configured maximum of unretired
    /// submissions. Sweep or drain before recording more work.
    InFlightLimit { limit: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Backend(e) => write!(f, "backend error: {}", e),
            Error::RegionTooLarge {
                requested,
                capacity,
            } => write!(
                f,
                "requested region of {} entries exceeds chunk capacity {}",
                requested, capacity
            ),
            Error::DescriptorPoolCap { limit } => {
                write!(f, "descriptor pool cap of {} pools reached", limit)
            }
            Error::UploadPageCap { limit } => {
                write!(f, "upload page cap of {} pages reached", limit)
            }
            Error::InFlightLimit { limit } => {
                write!(f, "in-flight submission limit of {} reached", limit)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::Backend(err)
    }
}
