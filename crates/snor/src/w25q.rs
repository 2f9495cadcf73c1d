//! Winbond W25Q command set, status-register bits and identification tables.
//!
//! Reference: Winbond W25Q128JV datasheet rev. L (2021), §8 Instructions.
//!
//! All W25Q parts covered here share the same instruction set; they differ
//! only in the capacity byte of the JEDEC ID (`0x9F`) response.

/// Instruction opcodes.
pub mod cmd {
    /// Set the Write Enable Latch (WEL). Required before every program/erase.
    pub const WRITE_ENABLE: u8 = 0x06;
    /// Clear the Write Enable Latch.
    pub const WRITE_DISABLE: u8 = 0x04;
    /// Read Status Register-1 (BUSY, WEL, BP0..2, TB, SEC, SRP0).
    pub const READ_STATUS_REGISTER_1: u8 = 0x05;
    /// Read Status Register-2 (SRP1, QE, LB1..3, CMP, SUS).
    pub const READ_STATUS_REGISTER_2: u8 = 0x35;
    /// Write Status Register.
    pub const WRITE_STATUS_REGISTER: u8 = 0x01;
    /// Page Program, single-line data, up to 256 bytes within one page.
    pub const PAGE_PROGRAM: u8 = 0x02;
    /// Quad Input Page Program, data phase on four lines.
    pub const QUAD_PAGE_PROGRAM: u8 = 0x32;
    /// 64 KB block erase.
    pub const BLOCK_ERASE_64KB: u8 = 0xD8;
    /// 32 KB block erase.
    pub const BLOCK_ERASE_32KB: u8 = 0x52;
    /// 4 KB sector erase.
    pub const SECTOR_ERASE_4KB: u8 = 0x20;
    /// Chip erase (all memory to `0xFF`).
    pub const CHIP_ERASE: u8 = 0xC7;
    /// Erase / program suspend.
    pub const ERASE_SUSPEND: u8 = 0x75;
    /// Erase / program resume.
    pub const ERASE_RESUME: u8 = 0x7A;
    /// Deep power-down.
    pub const POWER_DOWN: u8 = 0xB9;
    /// Release from deep power-down.
    pub const RELEASE_POWER_DOWN: u8 = 0xAB;
    /// Manufacturer / device ID (legacy, address-prefixed).
    pub const MANUFACTURER_DEVICE_ID: u8 = 0x90;
    /// Read 64-bit unique ID (followed by four dummy bytes).
    pub const READ_UNIQUE_ID: u8 = 0x4B;
    /// JEDEC ID: manufacturer, memory type, capacity.
    pub const READ_ID: u8 = 0x9F;
    /// Read Data, single line, no dummy cycles.
    pub const READ: u8 = 0x03;
    /// Fast Read, single line, 8 dummy cycles.
    pub const FAST_READ: u8 = 0x0B;
    /// Fast Read Dual Output.
    pub const FAST_READ_DUAL_OUTPUT: u8 = 0x3B;
    /// Fast Read Dual I/O (address and data on two lines).
    pub const FAST_READ_DUAL_IO: u8 = 0xBB;
    /// Fast Read Quad Output.
    pub const FAST_READ_QUAD_OUTPUT: u8 = 0x6B;
    /// Fast Read Quad I/O (address and data on four lines).
    pub const FAST_READ_QUAD_IO: u8 = 0xEB;
}

/// Status Register-1 bits.
pub mod sr1 {
    /// Status register protect 0.
    pub const STATUS_REGISTER_PROTECT_0: u8 = 0x80;
    /// Sector / block protect granularity.
    pub const SECTOR_PROTECT: u8 = 0x40;
    /// Top / bottom protect.
    pub const TOP_BOTTOM_PROTECT: u8 = 0x20;
    /// Block protect bit 2.
    pub const BP2: u8 = 0x10;
    /// Block protect bit 1.
    pub const BP1: u8 = 0x08;
    /// Block protect bit 0.
    pub const BP0: u8 = 0x04;
    /// All block-protect bits.
    pub const BLOCK_PROTECT: u8 = BP2 | BP1 | BP0;
    /// Write Enable Latch.
    pub const WRITE_ENABLE_LATCH: u8 = 0x02;
    /// Erase or program in progress.
    pub const BUSY: u8 = 0x01;
}

/// Status Register-2 bits.
pub mod sr2 {
    /// Erase / program suspended.
    pub const SUSPENDED: u8 = 0x80;
    /// Quad Enable: /WP and /HOLD become IO2 and IO3.
    pub const QUAD_ENABLE: u8 = 0x02;
    /// Status register protect 1.
    pub const STATUS_REGISTER_PROTECT_1: u8 = 0x01;
}

/// Program granularity: a page program never crosses a 256-byte boundary.
pub const PAGE_SIZE: u32 = 256;

/// Smallest erasable unit (`SECTOR_ERASE_4KB`).
pub const SUB_SECTOR_SIZE: u32 = 0x0000_1000;

/// 64 KB block (`BLOCK_ERASE_64KB`).
pub const BLOCK_SIZE: u32 = 0x0001_0000;

/// Value every byte reads back as after an erase.
pub const ERASED_VALUE: u8 = 0xFF;

/// Recommended delay before polling an in-progress erase again.
pub const ERASE_POLL_HINT_MS: u32 = 1;

/// M7-0 byte sent after the address of the `0xBB`/`0xEB` reads.
///
/// Continuous read mode latches only when M5-4 = `0b10`, so all-ones keeps
/// every read a full command.
pub const READ_MODE_BITS: u8 = 0xFF;

/// Supported JEDEC manufacturer IDs (Winbond).
pub const SUPPORTED_MANUFACTURER_IDS: &[u8] = &[0xEF];

/// Supported JEDEC memory-type IDs (W25Q, SPI mode).
pub const SUPPORTED_MEMORY_TYPE_IDS: &[u8] = &[0x40];

/// Capacity code → device size in bytes.
///
/// | Code | Part      | Size   |
/// |------|-----------|--------|
/// | 0x14 | W25Q80    | 1 MB   |
/// | 0x15 | W25Q16    | 2 MB   |
/// | 0x16 | W25Q32    | 4 MB   |
/// | 0x18 | W25Q128   | 16 MB  |
pub const SUPPORTED_CAPACITIES: &[(u8, u32)] = &[
    (0x14, 0x0010_0000),
    (0x15, 0x0020_0000),
    (0x16, 0x0040_0000),
    (0x18, 0x0100_0000),
];

/// Look up the device size for a JEDEC capacity code.
#[must_use]
pub fn capacity_bytes(code: u8) -> Option<u32> {
    SUPPORTED_CAPACITIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, size)| *size)
}

/// Encode a 24-bit flash address as the three big-endian bytes sent after an opcode.
#[must_use]
pub const fn address_bytes(addr: u32) -> [u8; 3] {
    let b = addr.to_be_bytes();
    [b[1], b[2], b[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_table_covers_every_whitelisted_part() {
        assert_eq!(capacity_bytes(0x14), Some(1024 * 1024));
        assert_eq!(capacity_bytes(0x15), Some(2 * 1024 * 1024));
        assert_eq!(capacity_bytes(0x16), Some(4 * 1024 * 1024));
        assert_eq!(capacity_bytes(0x18), Some(16 * 1024 * 1024));
        assert_eq!(capacity_bytes(0x17), None);
    }

    #[test]
    fn capacities_are_whole_blocks() {
        for (_, size) in SUPPORTED_CAPACITIES {
            assert_eq!(size % BLOCK_SIZE, 0);
            assert_eq!(size % SUB_SECTOR_SIZE, 0);
        }
    }

    #[test]
    fn block_protect_mask_is_bits_2_to_4() {
        assert_eq!(sr1::BLOCK_PROTECT, 0b0001_1100);
        assert_eq!(sr1::BLOCK_PROTECT & sr1::BUSY, 0);
        assert_eq!(sr1::BLOCK_PROTECT & sr1::WRITE_ENABLE_LATCH, 0);
    }

    #[test]
    fn address_is_24_bit_big_endian() {
        assert_eq!(address_bytes(0x0012_3456), [0x12, 0x34, 0x56]);
        // Upper byte is dropped: the W25Q parts here use 3-byte addressing.
        assert_eq!(address_bytes(0xFF00_0001), [0x00, 0x00, 0x01]);
    }

    #[test]
    fn page_and_sector_sizes_are_powers_of_two() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert!(SUB_SECTOR_SIZE.is_power_of_two());
        assert!(BLOCK_SIZE.is_power_of_two());
    }
}
