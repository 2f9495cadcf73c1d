//! Disk configuration.

/// Configuration of [`FlashDisk`](crate::FlashDisk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiskConfig {
    /// Logical sector size in bytes; `None` uses the flash erase sector size.
    ///
    /// Must be a non-zero multiple of the flash erase sector size.
    pub sector_size: Option<u32>,
}

impl DiskConfig {
    /// One logical sector per flash erase sector.
    #[must_use]
    pub const fn new() -> Self {
        Self { sector_size: None }
    }

    /// Fixed logical sector size.
    #[must_use]
    pub const fn with_sector_size(sector_size: u32) -> Self {
        Self {
            sector_size: Some(sector_size),
        }
    }

    /// Logical sector size for a flash erasing in `flash_sector_size` units,
    /// or `None` if the configured size is not a whole number of flash sectors.
    #[must_use]
    pub fn resolve(&self, flash_sector_size: u32) -> Option<u32> {
        let size = self.sector_size.unwrap_or(flash_sector_size);
        if size == 0 || flash_sector_size == 0 || size % flash_sector_size != 0 {
            return None;
        }
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_follows_flash_sector() {
        assert_eq!(DiskConfig::default().resolve(4096), Some(4096));
        assert_eq!(DiskConfig::new().resolve(65536), Some(65536));
    }

    #[test]
    fn logical_sector_must_be_multiple_of_flash_sector() {
        assert_eq!(DiskConfig::with_sector_size(8192).resolve(4096), Some(8192));
        assert_eq!(DiskConfig::with_sector_size(512).resolve(4096), None);
        assert_eq!(DiskConfig::with_sector_size(6144).resolve(4096), None);
        assert_eq!(DiskConfig::with_sector_size(0).resolve(4096), None);
    }
}
