//! Disk error type.

use crate::status::DiskResult;

/// Errors returned by [`FlashDisk`](crate::FlashDisk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiskError {
    /// The flash driver is not `Ready` (not initialised, erasing, or failed).
    NotReady,
    /// A flash operation failed after `completed` sectors were fully transferred.
    Error {
        /// Sectors fully transferred before the failure.
        completed: u32,
    },
    /// The flash reports block protection; writes are refused.
    WriteProtected,
    /// Sector range, buffer length or configuration is invalid.
    ParameterError,
}

impl DiskError {
    /// Equivalent `diskio` result code.
    #[must_use]
    pub const fn result(&self) -> DiskResult {
        match self {
            Self::NotReady => DiskResult::NotReady,
            Self::Error { .. } => DiskResult::Error,
            Self::WriteProtected => DiskResult::WriteProtected,
            Self::ParameterError => DiskResult::ParameterError,
        }
    }
}

impl core::fmt::Display for DiskError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotReady => write!(f, "Flash disk not ready"),
            Self::Error { completed } => {
                write!(f, "Flash disk I/O error after {completed} sectors")
            }
            Self::WriteProtected => write!(f, "Flash disk is write protected"),
            Self::ParameterError => write!(f, "Invalid flash disk parameter"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DiskError {}
