//! Driver configuration.
//!
//! Runtime knobs live in [`DriverConfig`]. The size of the erase-verify
//! comparison buffer is a const generic on [`SnorDriver`](crate::SnorDriver)
//! because it sizes a stack array.

use crate::w25q;

/// Default comparison buffer size for erase verification, in bytes.
///
/// Larger buffers scan faster but cost stack in `verify_erase`.
pub const DEFAULT_COMPARE_BUFFER_SIZE: usize = 32;

/// Which erase command backs a "sector".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SectorMode {
    /// 4 KB sub-sectors (`0x20`).
    #[default]
    SubSector4K,
    /// 64 KB blocks (`0xD8`).
    Block64K,
}

impl SectorMode {
    /// Sector size in bytes.
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::SubSector4K => w25q::SUB_SECTOR_SIZE,
            Self::Block64K => w25q::BLOCK_SIZE,
        }
    }

    /// Opcode that erases one sector.
    #[must_use]
    pub const fn erase_opcode(self) -> u8 {
        match self {
            Self::SubSector4K => w25q::cmd::SECTOR_ERASE_4KB,
            Self::Block64K => w25q::cmd::BLOCK_ERASE_64KB,
        }
    }
}

/// Runtime configuration of [`SnorDriver`](crate::SnorDriver).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    /// Erase granularity exposed as a "sector".
    pub sector_mode: SectorMode,
    /// Sleep between status polls so lower-priority tasks get CPU time.
    ///
    /// Disable for minimum program latency.
    pub nice_waiting: bool,
    /// Sleep between status polls when `nice_waiting` is set, in microseconds.
    pub poll_interval_us: u32,
    /// Upper bound on status reads while waiting for a page program.
    pub max_status_polls: u32,
    /// Upper bound on the time `wait_erase` spends polling, in milliseconds.
    ///
    /// A W25Q128 chip erase takes up to 200 s.
    pub erase_timeout_ms: u32,
}

impl DriverConfig {
    /// W25Q defaults: 4 KB sectors, 1 ms nice waiting, 3 ms page-program bound
    /// with head-room, 400 s erase bound.
    #[must_use]
    pub const fn w25q_default() -> Self {
        Self {
            sector_mode: SectorMode::SubSector4K,
            nice_waiting: true,
            poll_interval_us: 1_000,
            max_status_polls: 100,
            erase_timeout_ms: 400_000,
        }
    }

    /// Busy-spin configuration: no sleeps between polls.
    ///
    /// `max_status_polls` is raised since each poll is only one bus transaction.
    #[must_use]
    pub const fn low_latency() -> Self {
        Self {
            nice_waiting: false,
            max_status_polls: 100_000,
            ..Self::w25q_default()
        }
    }

    /// Same configuration with a different sector mode.
    #[must_use]
    pub const fn with_sector_mode(self, sector_mode: SectorMode) -> Self {
        Self {
            sector_mode,
            ..self
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::w25q_default()
    }
}
