//! Driver error type.

use crate::descriptor::{DeviceId, DeviceState};

/// What stopped a multi-chunk operation part-way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureCause {
    /// The bus transport reported an error.
    Transport,
    /// The device stayed busy past the polling bound.
    Timeout,
    /// A post-erase check found non-erased data.
    Verify,
}

/// Errors returned by [`SnorDriver`](crate::SnorDriver).
///
/// `E` is the error type of the underlying [`BusTransport`](crate::BusTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError<E> {
    /// Bus-level failure; never retried inside the driver.
    Transport(E),
    /// The identity read at init is not on the supported list.
    UnsupportedDevice(DeviceId),
    /// The driver is not in a state that accepts this operation.
    Busy(DeviceState),
    /// A byte at `offset` does not hold the erased value after an erase.
    VerifyFailure {
        /// Absolute flash offset of the first non-erased byte.
        offset: u32,
    },
    /// The device stayed busy past the configured polling bound.
    Timeout,
    /// A multi-chunk operation stopped after `completed` units were done.
    ///
    /// For `program` the unit is bytes.
    PartialTransfer {
        /// Units fully completed before the failure.
        completed: usize,
        /// Why the next unit failed.
        cause: FailureCause,
    },
    /// The requested range lies outside the device.
    OutOfBounds,
    /// The requested range is not aligned to the erase sector size.
    NotAligned,
    /// Quad mode was requested but the QE bit did not latch (status register
    /// write-protected, or a part without quad I/O).
    QuadEnableFailed,
}

impl<E> FlashError<E> {
    /// The cause reported if this error interrupts a multi-chunk operation.
    #[must_use]
    pub fn cause(&self) -> FailureCause {
        match self {
            Self::Timeout => FailureCause::Timeout,
            Self::VerifyFailure { .. } => FailureCause::Verify,
            Self::PartialTransfer { cause, .. } => *cause,
            _ => FailureCause::Transport,
        }
    }

    /// Map the transport error, keeping every other variant.
    pub fn map_transport<F, O>(self, f: O) -> FlashError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::Transport(e) => FlashError::Transport(f(e)),
            Self::UnsupportedDevice(id) => FlashError::UnsupportedDevice(id),
            Self::Busy(state) => FlashError::Busy(state),
            Self::VerifyFailure { offset } => FlashError::VerifyFailure { offset },
            Self::Timeout => FlashError::Timeout,
            Self::PartialTransfer { completed, cause } => {
                FlashError::PartialTransfer { completed, cause }
            }
            Self::OutOfBounds => FlashError::OutOfBounds,
            Self::NotAligned => FlashError::NotAligned,
            Self::QuadEnableFailed => FlashError::QuadEnableFailed,
        }
    }
}

impl core::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Verify => write!(f, "verify failure"),
        }
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for FlashError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Flash bus transport error: {e:?}"),
            Self::UnsupportedDevice(id) => write!(f, "Unsupported flash device {id}"),
            Self::Busy(state) => write!(f, "Flash device busy ({state})"),
            Self::VerifyFailure { offset } => {
                write!(f, "Erase verify failed at offset {offset:#x}")
            }
            Self::Timeout => write!(f, "Flash device did not become ready in time"),
            Self::PartialTransfer { completed, cause } => {
                write!(f, "Flash operation stopped after {completed} units: {cause}")
            }
            Self::OutOfBounds => write!(f, "Flash access out of bounds"),
            Self::NotAligned => write!(f, "Flash access not sector aligned"),
            Self::QuadEnableFailed => write!(f, "Flash quad mode could not be enabled"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug> std::error::Error for FlashError<E> {}

impl<E: core::fmt::Debug> embedded_storage::nor_flash::NorFlashError for FlashError<E> {
    fn kind(&self) -> embedded_storage::nor_flash::NorFlashErrorKind {
        use embedded_storage::nor_flash::NorFlashErrorKind;
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

    #[test]
    fn cause_of_nested_partial_transfer_is_preserved() {
        let e: FlashError<()> = FlashError::PartialTransfer {
            completed: 256,
            cause: FailureCause::Timeout,
        };
        assert_eq!(e.cause(), FailureCause::Timeout);
        assert_eq!(FlashError::<()>::Timeout.cause(), FailureCause::Timeout);
        assert_eq!(FlashError::Transport(()).cause(), FailureCause::Transport);
    }

    #[test]
    fn nor_flash_kind_mapping() {
        assert_eq!(FlashError::<()>::OutOfBounds.kind(), NorFlashErrorKind::OutOfBounds);
        assert_eq!(FlashError::<()>::NotAligned.kind(), NorFlashErrorKind::NotAligned);
        assert_eq!(FlashError::<()>::Timeout.kind(), NorFlashErrorKind::Other);
    }

    #[test]
    fn map_transport_converts_only_transport_variant() {
        let e: FlashError<u8> = FlashError::Transport(7);
        assert_eq!(e.map_transport(u16::from), FlashError::Transport(7u16));
        let v: FlashError<u8> = FlashError::VerifyFailure { offset: 4 };
        assert_eq!(v.map_transport(u16::from), FlashError::VerifyFailure { offset: 4 });
    }

    #[test]
    fn display_mentions_offset_in_hex() {
        let e: FlashError<()> = FlashError::VerifyFailure { offset: 0x1000 };
        assert!(format!("{e}").contains("0x1000"));
    }
}
