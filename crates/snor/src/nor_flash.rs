//! `embedded-storage-async` NOR flash traits for [`SnorDriver`].
//!
//! Erase through these traits always works on 4 KB sub-sectors regardless of
//! [`SectorMode`](crate::SectorMode), so `ERASE_SIZE` is a true constant.

use embedded_hal_async::delay::DelayNs;
use embedded_storage_async::nor_flash::{ErrorType, MultiwriteNorFlash, NorFlash, ReadNorFlash};

use crate::bus::BusTransport;
use crate::driver::SnorDriver;
use crate::error::FlashError;
use crate::w25q::{self, cmd};

impl<T, D, const CMP: usize> ErrorType for SnorDriver<T, D, CMP>
where
    T: BusTransport,
{
    type Error = FlashError<T::Error>;
}

impl<T, D, const CMP: usize> ReadNorFlash for SnorDriver<T, D, CMP>
where
    T: BusTransport,
    D: DelayNs,
{
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        SnorDriver::read(self, offset, bytes).await
    }

    fn capacity(&self) -> usize {
        self.descriptor().size as usize
    }
}

impl<T, D, const CMP: usize> NorFlash for SnorDriver<T, D, CMP>
where
    T: BusTransport,
    D: DelayNs,
{
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = w25q::SUB_SECTOR_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to || to > self.descriptor().size {
            return Err(FlashError::OutOfBounds);
        }
        if from % w25q::SUB_SECTOR_SIZE != 0 || to % w25q::SUB_SECTOR_SIZE != 0 {
            return Err(FlashError::NotAligned);
        }

        let mut offset = from;
        while offset < to {
            self.start_erase_at(cmd::SECTOR_ERASE_4KB, offset).await?;
            self.wait_erase().await?;
            offset = offset.saturating_add(w25q::SUB_SECTOR_SIZE);
        }
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.program(offset, bytes).await
    }
}

/// Bits only go from 1 to 0 between erases, so rewriting a location is allowed.
impl<T, D, const CMP: usize> MultiwriteNorFlash for SnorDriver<T, D, CMP>
where
    T: BusTransport,
    D: DelayNs,
{
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::{DriverConfig, SectorMode};
    use crate::mocks::{InstantDelay, SimulatedW25q};

    async fn storage() -> SnorDriver<SimulatedW25q, InstantDelay> {
        let mut drv = SnorDriver::new(
            SimulatedW25q::w25q80(),
            InstantDelay::default(),
            DriverConfig::default().with_sector_mode(SectorMode::Block64K),
        );
        drv.init().await.unwrap();
        drv
    }

    #[tokio::test]
    async fn capacity_matches_descriptor() {
        let drv = storage().await;
        assert_eq!(ReadNorFlash::capacity(&drv), 1024 * 1024);
    }

    #[tokio::test]
    async fn erase_uses_4k_commands_even_in_block_mode() {
        let mut drv = storage().await;
        NorFlash::erase(&mut drv, 0x1000, 0x3000).await.unwrap();
        let erases = drv
            .transport()
            .opcode_log()
            .iter()
            .filter(|&&o| o == cmd::SECTOR_ERASE_4KB)
            .count();
        assert_eq!(erases, 2);
    }

    #[tokio::test]
    async fn erase_rejects_misaligned_and_reversed_ranges() {
        let mut drv = storage().await;
        assert_eq!(
            NorFlash::erase(&mut drv, 0x10, 0x1000).await,
            Err(FlashError::NotAligned)
        );
        assert_eq!(
            NorFlash::erase(&mut drv, 0x2000, 0x1000).await,
            Err(FlashError::OutOfBounds)
        );
    }

    #[tokio::test]
    async fn write_then_read_through_traits() {
        let mut drv = storage().await;
        NorFlash::write(&mut drv, 0x1FE, b"nor!").await.unwrap();
        let mut buf = [0u8; 4];
        ReadNorFlash::read(&mut drv, 0x1FE, &mut buf).await.unwrap();
        assert_eq!(&buf, b"nor!");
    }

    #[tokio::test]
    async fn multiwrite_only_clears_bits() {
        let mut drv = storage().await;
        NorFlash::write(&mut drv, 0, &[0xF0]).await.unwrap();
        NorFlash::write(&mut drv, 0, &[0x3C]).await.unwrap();
        let mut buf = [0u8; 1];
        ReadNorFlash::read(&mut drv, 0, &mut buf).await.unwrap();
        assert_eq!(buf, [0x30]);
    }
}
