//! Static facts about the attached device: identity, geometry, state.

use crate::w25q;

/// Capability flags of a flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct FlashAttributes(u8);

impl FlashAttributes {
    /// Erased cells read back as all ones (`0xFF`) rather than zeros.
    pub const ERASED_IS_ONE: Self = Self(0x01);
    /// Cells can be programmed more than once between erases (bits only go 1 → 0).
    pub const REWRITABLE: Self = Self(0x02);
    /// The device can suspend an in-progress erase.
    pub const SUSPEND_ERASE_CAPABLE: Self = Self(0x04);

    /// No attributes set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Union of two attribute sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `true` if every flag in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for FlashAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Geometry and capabilities of an identified flash device.
///
/// Built by [`SnorDriver::init`](crate::SnorDriver::init) from the device
/// identity; `size == sector_count * sector_size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashDescriptor {
    /// Capability flags.
    pub attributes: FlashAttributes,
    /// Program page size in bytes.
    pub page_size: u32,
    /// Erase sector size in bytes.
    pub sector_size: u32,
    /// Number of erase sectors.
    pub sector_count: u32,
    /// Total addressable size in bytes.
    pub size: u32,
    /// Base address of the device in the flash address space.
    pub address: u32,
}

impl FlashDescriptor {
    /// Descriptor for a W25Q part of `capacity` bytes erased in `sector_size` units.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // sector_size is a non-zero power of two
    pub const fn w25q(capacity: u32, sector_size: u32) -> Self {
        let sector_count = capacity / sector_size;
        Self {
            attributes: FlashAttributes::ERASED_IS_ONE
                .union(FlashAttributes::REWRITABLE)
                .union(FlashAttributes::SUSPEND_ERASE_CAPABLE),
            page_size: w25q::PAGE_SIZE,
            sector_size,
            sector_count,
            size: sector_count * sector_size,
            address: 0,
        }
    }

    /// Placeholder used before the device has been identified.
    #[must_use]
    pub const fn unidentified(sector_size: u32) -> Self {
        Self {
            attributes: FlashAttributes::empty(),
            page_size: w25q::PAGE_SIZE,
            sector_size,
            sector_count: 0,
            size: 0,
            address: 0,
        }
    }

    /// Byte value of an erased cell.
    #[must_use]
    pub const fn erased_value(&self) -> u8 {
        if self.attributes.contains(FlashAttributes::ERASED_IS_ONE) {
            0xFF
        } else {
            0x00
        }
    }

    /// Byte offset of the first byte of `sector`, or `None` past the end of the device.
    #[must_use]
    pub fn sector_offset(&self, sector: u32) -> Option<u32> {
        if sector >= self.sector_count {
            return None;
        }
        sector.checked_mul(self.sector_size)
    }

    /// `true` if `[offset, offset + len)` lies inside the device.
    #[must_use]
    pub fn contains_range(&self, offset: u32, len: usize) -> bool {
        u32::try_from(len)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .is_some_and(|end| end <= self.size)
    }
}

/// Raw JEDEC identity bytes as returned by the read-ID command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId {
    /// JEDEC manufacturer code (`0xEF` for Winbond).
    pub manufacturer: u8,
    /// Memory type code.
    pub memory_type: u8,
    /// Capacity code; selects the device size.
    pub capacity: u8,
}

impl DeviceId {
    /// Build from the three response bytes in wire order.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            manufacturer: bytes[0],
            memory_type: bytes[1],
            capacity: bytes[2],
        }
    }

    /// The three bytes in wire order.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 3] {
        [self.manufacturer, self.memory_type, self.capacity]
    }

    /// Device size in bytes if all three bytes are whitelisted, `None` otherwise.
    #[must_use]
    pub fn supported_capacity(&self) -> Option<u32> {
        if !w25q::SUPPORTED_MANUFACTURER_IDS.contains(&self.manufacturer)
            || !w25q::SUPPORTED_MEMORY_TYPE_IDS.contains(&self.memory_type)
        {
            return None;
        }
        w25q::capacity_bytes(self.capacity)
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}",
            self.manufacturer, self.memory_type, self.capacity
        )
    }
}

/// Operational state of the driver.
///
/// `NotReady` and `Ready` are the rest states; `Erasing`, `Reading` and
/// `Programming` last for one operation (erase until it is observed complete
/// through [`query_erase`](crate::SnorDriver::query_erase)). `Error` is entered
/// only when the device stops answering within the polling bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Not identified yet, or in deep power-down.
    #[default]
    NotReady,
    /// Idle and accepting operations.
    Ready,
    /// An erase has been started and not yet observed complete.
    Erasing,
    /// A read or verify scan is in progress.
    Reading,
    /// A program operation is in progress.
    Programming,
    /// The device stopped responding; re-run `init` to recover.
    Error,
}

impl core::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::NotReady => "not ready",
            Self::Ready => "ready",
            Self::Erasing => "erasing",
            Self::Reading => "reading",
            Self::Programming => "programming",
            Self::Error => "error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn w25q128_descriptor_geometry() {
        let d = FlashDescriptor::w25q(16 * 1024 * 1024, w25q::SUB_SECTOR_SIZE);
        assert_eq!(d.sector_count, 4096);
        assert_eq!(d.size, d.sector_count * d.sector_size);
        assert_eq!(d.page_size, 256);
        assert_eq!(d.erased_value(), 0xFF);
        assert!(d.attributes.contains(FlashAttributes::SUSPEND_ERASE_CAPABLE));
    }

    #[test]
    fn sector_offset_rejects_out_of_range() {
        let d = FlashDescriptor::w25q(1024 * 1024, w25q::SUB_SECTOR_SIZE);
        assert_eq!(d.sector_offset(0), Some(0));
        assert_eq!(d.sector_offset(255), Some(255 * 4096));
        assert_eq!(d.sector_offset(256), None);
    }

    #[test]
    fn contains_range_checks_end_not_start() {
        let d = FlashDescriptor::w25q(1024 * 1024, w25q::BLOCK_SIZE);
        assert!(d.contains_range(0, 1024 * 1024));
        assert!(!d.contains_range(1, 1024 * 1024));
        assert!(!d.contains_range(u32::MAX, 2));
    }

    #[test]
    fn device_id_whitelist() {
        assert_eq!(
            DeviceId::from_bytes([0xEF, 0x40, 0x18]).supported_capacity(),
            Some(16 * 1024 * 1024)
        );
        assert_eq!(DeviceId::from_bytes([0xC2, 0x40, 0x18]).supported_capacity(), None);
        assert_eq!(DeviceId::from_bytes([0xEF, 0x60, 0x18]).supported_capacity(), None);
        assert_eq!(DeviceId::from_bytes([0xEF, 0x40, 0x17]).supported_capacity(), None);
    }

    #[test]
    fn device_id_display_is_colon_hex() {
        let id = DeviceId::from_bytes([0xEF, 0x40, 0x18]);
        assert_eq!(format!("{id}"), "EF:40:18");
    }

    #[test]
    fn attributes_union_and_contains() {
        let a = FlashAttributes::ERASED_IS_ONE | FlashAttributes::REWRITABLE;
        assert!(a.contains(FlashAttributes::ERASED_IS_ONE));
        assert!(!a.contains(FlashAttributes::SUSPEND_ERASE_CAPABLE));
        assert_eq!(FlashAttributes::empty().bits(), 0);
    }
}
