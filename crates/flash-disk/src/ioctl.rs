//! Miscellaneous drive control commands.

/// Control command accepted by [`FlashDisk::ioctl`](crate::FlashDisk::ioctl).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlCommand {
    /// Flush pending writes. Writes are never cached, so this only checks readiness.
    Sync,
    /// Number of logical sectors on the drive.
    GetSectorCount,
    /// Logical sector size in bytes.
    GetSectorSize,
    /// Erase block size in logical sectors.
    GetBlockSize,
    /// Erase the logical sectors in `start..end` without programming them.
    Trim {
        /// First sector to erase.
        start: u32,
        /// One past the last sector to erase.
        end: u32,
    },
}

/// Reply to an [`IoctlCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlResponse {
    /// Command carried out; nothing to report.
    Done,
    /// Reply to [`IoctlCommand::GetSectorCount`].
    SectorCount(u32),
    /// Reply to [`IoctlCommand::GetSectorSize`].
    SectorSize(u32),
    /// Reply to [`IoctlCommand::GetBlockSize`].
    BlockSize(u32),
}
