//! Drive status flags and C-style result codes.

/// Drive status bits reported by `status` / `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct DiskStatus(u8);

impl DiskStatus {
    /// No flag set: ready and writable.
    ///
    /// This is the empty set, not a flag, so `contains(READY)` is always
    /// `true`. Compare with `==` or use [`is_ready`](Self::is_ready), which
    /// also accepts a ready but write-protected drive.
    pub const READY: Self = Self(0x00);
    /// The underlying device has not been initialised.
    pub const NOINIT: Self = Self(0x01);
    /// No medium present. Never set for soldered flash.
    pub const NODISK: Self = Self(0x02);
    /// The medium is write protected.
    pub const PROTECT: Self = Self(0x04);

    /// `true` if every flag in `other` is set (vacuously so for [`READY`](Self::READY)).
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if no blocking flag (`NOINIT` / `NODISK`) is set.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        self.0 & (Self::NOINIT.0 | Self::NODISK.0) == 0
    }

    /// Raw bits, as a C `DSTATUS`.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for DiskStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result code for a C `diskio` layer (`DRESULT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DiskResult {
    /// Success.
    Ok = 0,
    /// Unrecoverable read/write error.
    Error = 1,
    /// Medium is write protected.
    WriteProtected = 2,
    /// Device not ready.
    NotReady = 3,
    /// Invalid parameter.
    ParameterError = 4,
}

impl DiskResult {
    /// Code for the outcome of any disk operation.
    pub fn of<T>(result: &Result<T, crate::DiskError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.result(),
        }
    }
}

impl From<DiskResult> for u8 {
    fn from(r: DiskResult) -> u8 {
        r as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiskError;

    #[test]
    fn status_flags_combine() {
        let s = DiskStatus::NOINIT | DiskStatus::PROTECT;
        assert!(s.contains(DiskStatus::PROTECT));
        assert!(!s.is_ready());
        assert_eq!(s.bits(), 0x05);
        assert!(DiskStatus::PROTECT.is_ready());
        assert!(DiskStatus::READY.is_ready());
    }

    #[test]
    fn ready_is_the_empty_set() {
        assert_eq!(DiskStatus::READY.bits(), 0);
        assert_eq!(DiskStatus::READY, DiskStatus::default());
        // Vacuous: every status contains the empty set.
        assert!(DiskStatus::NOINIT.contains(DiskStatus::READY));
        assert_ne!(DiskStatus::NOINIT, DiskStatus::READY);
        assert_ne!(DiskStatus::PROTECT, DiskStatus::READY);
    }

    #[test]
    fn result_codes_match_diskio_numbering() {
        assert_eq!(u8::from(DiskResult::Ok), 0);
        assert_eq!(u8::from(DiskResult::ParameterError), 4);
        assert_eq!(DiskResult::of::<u32>(&Ok(1)), DiskResult::Ok);
        assert_eq!(
            DiskResult::of::<u32>(&Err(DiskError::Error { completed: 3 })),
            DiskResult::Error
        );
    }
}
