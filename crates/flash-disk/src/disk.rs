//! Sector-addressed disk over a [`SnorDriver`].
//!
//! Each logical sector covers one or more whole flash erase sectors. Writes
//! go through the full cycle for every logical sector:
//!
//! ```text
//! for each flash sector: start_erase_sector → wait_erase → verify_erase
//! then:                  program(whole logical sector)
//! ```
//!
//! Every write erases first, even when the new data could be programmed over
//! the old contents. There is no wear levelling.

use embedded_hal_async::delay::DelayNs;
use snor::{BusTransport, DeviceState, FlashError, SnorDriver, DEFAULT_COMPARE_BUFFER_SIZE};

use crate::config::DiskConfig;
use crate::error::DiskError;
use crate::ioctl::{IoctlCommand, IoctlResponse};
use crate::status::DiskStatus;

/// Block device backed by serial NOR flash.
///
/// The flash driver must be initialised before the disk is used; the disk
/// never calls [`SnorDriver::init`] itself.
pub struct FlashDisk<T, D, const CMP: usize = DEFAULT_COMPARE_BUFFER_SIZE> {
    flash: SnorDriver<T, D, CMP>,
    config: DiskConfig,
}

impl<T, D, const CMP: usize> FlashDisk<T, D, CMP> {
    /// Wrap a flash driver.
    ///
    /// # Errors
    ///
    /// [`DiskError::ParameterError`] if the configured logical sector size is
    /// not a non-zero multiple of the flash erase sector size.
    pub fn new(flash: SnorDriver<T, D, CMP>, config: DiskConfig) -> Result<Self, DiskError> {
        let flash_sector = flash.descriptor().sector_size;
        let Some(sector_size) = config.resolve(flash_sector) else {
            error!(
                "disk sector size must be a multiple of the {} byte flash sector",
                flash_sector
            );
            return Err(DiskError::ParameterError);
        };
        debug!("flash disk with {} byte sectors", sector_size);
        Ok(Self { flash, config })
    }

    /// The flash driver.
    pub fn flash(&self) -> &SnorDriver<T, D, CMP> {
        &self.flash
    }

    /// The flash driver, mutably (e.g. to run `init` after a failure).
    pub fn flash_mut(&mut self) -> &mut SnorDriver<T, D, CMP> {
        &mut self.flash
    }

    /// Give back the flash driver.
    pub fn release(self) -> SnorDriver<T, D, CMP> {
        self.flash
    }

    /// Logical sector size in bytes.
    pub fn sector_size(&self) -> u32 {
        let flash_sector = self.flash.descriptor().sector_size;
        self.config.resolve(flash_sector).unwrap_or(flash_sector)
    }

    /// Number of logical sectors (0 until the flash has been identified).
    pub fn sector_count(&self) -> u32 {
        self.flash
            .descriptor()
            .size
            .checked_div(self.sector_size())
            .unwrap_or(0)
    }

    fn flash_sectors_per_sector(&self) -> u32 {
        self.sector_size()
            .checked_div(self.flash.descriptor().sector_size)
            .unwrap_or(1)
    }

    fn check_ready(&self) -> Result<(), DiskError> {
        if self.flash.state() == DeviceState::Ready {
            Ok(())
        } else {
            Err(DiskError::NotReady)
        }
    }

    /// Number of sectors in a `len`-byte transfer starting at `start`.
    fn sector_span(&self, start: u32, len: usize) -> Result<u32, DiskError> {
        let sector_size = self.sector_size() as usize;
        if len.checked_rem(sector_size) != Some(0) {
            return Err(DiskError::ParameterError);
        }
        let count = len
            .checked_div(sector_size)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(DiskError::ParameterError)?;
        match start.checked_add(count) {
            Some(end) if end <= self.sector_count() => Ok(count),
            _ => Err(DiskError::ParameterError),
        }
    }

    fn byte_offset(&self, sector: u32) -> Result<u32, DiskError> {
        sector
            .checked_mul(self.sector_size())
            .ok_or(DiskError::ParameterError)
    }
}

impl<T, D, const CMP: usize> FlashDisk<T, D, CMP>
where
    T: BusTransport,
    D: DelayNs,
{
    /// Drive status: `NOINIT` unless the flash is `Ready`, plus `PROTECT`
    /// when the device reports block protection.
    pub async fn status(&mut self) -> DiskStatus {
        if self.flash.state() != DeviceState::Ready {
            return DiskStatus::NOINIT;
        }
        match self.flash.is_write_protected().await {
            Ok(true) => DiskStatus::PROTECT,
            Ok(false) => DiskStatus::READY,
            Err(e) => {
                warn!("status register read failed: {}", e.cause());
                DiskStatus::NOINIT
            }
        }
    }

    /// Same as [`status`](Self::status); the flash is initialised by its owner.
    pub async fn initialize(&mut self) -> DiskStatus {
        self.status().await
    }

    /// Read whole sectors starting at `start` into `buf`.
    ///
    /// Returns the number of sectors read.
    ///
    /// # Errors
    ///
    /// - [`DiskError::NotReady`] if the flash is not `Ready`.
    /// - [`DiskError::ParameterError`] if `buf` is not a whole number of
    ///   sectors or the range runs past the end of the disk.
    /// - [`DiskError::Error`] with the sectors already read on flash failure.
    pub async fn read(&mut self, start: u32, buf: &mut [u8]) -> Result<u32, DiskError> {
        self.check_ready()?;
        let count = self.sector_span(start, buf.len())?;
        let sector_size = self.sector_size() as usize;

        let mut completed = 0u32;
        for (sector, chunk) in (start..).zip(buf.chunks_exact_mut(sector_size)) {
            let offset = self.byte_offset(sector)?;
            if let Err(e) = self.flash.read(offset, chunk).await {
                warn!("disk read failed at sector {}: {}", sector, e.cause());
                return Err(DiskError::Error { completed });
            }
            completed = completed.saturating_add(1);
        }
        trace!("read {} sectors from {}", count, start);
        Ok(count)
    }

    /// Write whole sectors starting at `start` from `data`.
    ///
    /// Each sector is erased, verified and then programmed before the next
    /// one is touched. Returns the number of sectors written.
    ///
    /// # Errors
    ///
    /// As for [`read`](Self::read), plus [`DiskError::WriteProtected`] when
    /// block protection is active. On [`DiskError::Error`] exactly
    /// `completed` sectors hold the new data; the failing sector may be erased
    /// or partially programmed.
    pub async fn write(&mut self, start: u32, data: &[u8]) -> Result<u32, DiskError> {
        self.check_ready()?;
        let count = self.sector_span(start, data.len())?;
        self.check_writable().await?;
        let sector_size = self.sector_size() as usize;

        let mut completed = 0u32;
        for (sector, chunk) in (start..).zip(data.chunks_exact(sector_size)) {
            if let Err(e) = self.write_sector(sector, chunk).await {
                warn!("disk write failed at sector {}: {}", sector, e.cause());
                return Err(DiskError::Error { completed });
            }
            completed = completed.saturating_add(1);
        }
        trace!("wrote {} sectors at {}", count, start);
        Ok(count)
    }

    /// Drive control.
    ///
    /// # Errors
    ///
    /// [`DiskError::NotReady`] for every command while the flash is not
    /// `Ready`; `Trim` fails like [`write`](Self::write).
    pub async fn ioctl(&mut self, command: IoctlCommand) -> Result<IoctlResponse, DiskError> {
        self.check_ready()?;
        match command {
            IoctlCommand::Sync => Ok(IoctlResponse::Done),
            IoctlCommand::GetSectorCount => Ok(IoctlResponse::SectorCount(self.sector_count())),
            IoctlCommand::GetSectorSize => Ok(IoctlResponse::SectorSize(self.sector_size())),
            // One logical sector is always one or more whole erase units.
            IoctlCommand::GetBlockSize => Ok(IoctlResponse::BlockSize(1)),
            IoctlCommand::Trim { start, end } => {
                self.trim(start, end).await?;
                Ok(IoctlResponse::Done)
            }
        }
    }

    /// Erase sectors `start..end` without programming them.
    async fn trim(&mut self, start: u32, end: u32) -> Result<(), DiskError> {
        if start > end || end > self.sector_count() {
            return Err(DiskError::ParameterError);
        }
        self.check_writable().await?;

        let mut completed = 0u32;
        for sector in start..end {
            if let Err(e) = self.erase_sector(sector, false).await {
                warn!("trim failed at sector {}: {}", sector, e.cause());
                return Err(DiskError::Error { completed });
            }
            completed = completed.saturating_add(1);
        }
        debug!("trimmed sectors {}..{}", start, end);
        Ok(())
    }

    async fn check_writable(&mut self) -> Result<(), DiskError> {
        match self.flash.is_write_protected().await {
            Ok(false) => Ok(()),
            Ok(true) => Err(DiskError::WriteProtected),
            Err(_) => Err(DiskError::Error { completed: 0 }),
        }
    }

    async fn write_sector(&mut self, sector: u32, data: &[u8]) -> Result<(), FlashError<T::Error>> {
        let offset = self.erase_sector(sector, true).await?;
        self.flash.program(offset, data).await
    }

    /// Erase every flash sector backing logical `sector`, returning its byte offset.
    async fn erase_sector(
        &mut self,
        sector: u32,
        verify: bool,
    ) -> Result<u32, FlashError<T::Error>> {
        let per_sector = self.flash_sectors_per_sector();
        let first = sector
            .checked_mul(per_sector)
            .ok_or(FlashError::OutOfBounds)?;
        for flash_sector in first..first.saturating_add(per_sector) {
            self.flash.start_erase_sector(flash_sector).await?;
            self.flash.wait_erase().await?;
            if verify {
                self.flash.verify_erase(flash_sector).await?;
            }
        }
        self.flash
            .descriptor()
            .sector_offset(first)
            .ok_or(FlashError::OutOfBounds)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use snor::mocks::{InstantDelay, SimulatedW25q};
    use snor::w25q::cmd;
    use snor::{DriverConfig, SectorMode};

    type Disk = FlashDisk<SimulatedW25q, InstantDelay>;

    async fn ready_flash() -> SnorDriver<SimulatedW25q, InstantDelay> {
        let mut flash = SnorDriver::new(
            SimulatedW25q::w25q80(),
            InstantDelay::default(),
            DriverConfig::low_latency(),
        );
        flash.init().await.unwrap();
        flash
    }

    async fn disk() -> Disk {
        FlashDisk::new(ready_flash().await, DiskConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn geometry_follows_flash() {
        let mut d = disk().await;
        assert_eq!(d.sector_size(), 4096);
        assert_eq!(d.sector_count(), 256);
        assert_eq!(
            d.ioctl(IoctlCommand::GetSectorCount).await,
            Ok(IoctlResponse::SectorCount(256))
        );
        assert_eq!(
            d.ioctl(IoctlCommand::GetSectorSize).await,
            Ok(IoctlResponse::SectorSize(4096))
        );
        assert_eq!(
            d.ioctl(IoctlCommand::GetBlockSize).await,
            Ok(IoctlResponse::BlockSize(1))
        );
        assert_eq!(d.ioctl(IoctlCommand::Sync).await, Ok(IoctlResponse::Done));
    }

    #[tokio::test]
    async fn logical_sector_not_multiple_of_flash_sector_is_rejected() {
        let flash = ready_flash().await;
        assert!(matches!(
            FlashDisk::new(flash, DiskConfig::with_sector_size(512)),
            Err(DiskError::ParameterError)
        ));
    }

    #[tokio::test]
    async fn uninitialised_flash_reports_noinit() {
        let flash: SnorDriver<SimulatedW25q, InstantDelay> = SnorDriver::new(
            SimulatedW25q::w25q80(),
            InstantDelay::default(),
            DriverConfig::default(),
        );
        let mut d = FlashDisk::new(flash, DiskConfig::default()).unwrap();
        assert_eq!(d.initialize().await, DiskStatus::NOINIT);
        let mut buf = [0u8; 4096];
        assert_eq!(d.read(0, &mut buf).await, Err(DiskError::NotReady));
        assert_eq!(d.ioctl(IoctlCommand::Sync).await, Err(DiskError::NotReady));

        d.flash_mut().init().await.unwrap();
        assert_eq!(d.status().await, DiskStatus::READY);
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let mut d = disk().await;
        let data: std::vec::Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(d.write(5, &data).await, Ok(2));
        let mut back = std::vec![0u8; 8192];
        assert_eq!(d.read(5, &mut back).await, Ok(2));
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn write_replaces_old_contents() {
        let mut d = disk().await;
        d.write(0, &[0x00; 4096]).await.unwrap();
        d.write(0, &[0xA5; 4096]).await.unwrap();
        let mut back = [0u8; 4096];
        d.read(0, &mut back).await.unwrap();
        assert!(back.iter().all(|&b| b == 0xA5));
    }

    #[tokio::test]
    async fn partial_buffer_is_a_parameter_error() {
        let mut d = disk().await;
        let mut buf = [0u8; 100];
        assert_eq!(d.read(0, &mut buf).await, Err(DiskError::ParameterError));
        assert_eq!(d.write(0, &buf).await, Err(DiskError::ParameterError));
    }

    #[tokio::test]
    async fn range_past_end_is_a_parameter_error() {
        let mut d = disk().await;
        let mut buf = [0u8; 8192];
        assert_eq!(d.read(255, &mut buf).await, Err(DiskError::ParameterError));
        assert_eq!(
            d.read(u32::MAX, &mut buf[..4096]).await,
            Err(DiskError::ParameterError)
        );
    }

    #[tokio::test]
    async fn protected_flash_refuses_writes_and_trims() {
        let mut d = disk().await;
        d.flash_mut().transport_mut().set_block_protect(0b111);
        assert!(d.status().await.contains(DiskStatus::PROTECT));
        assert_eq!(d.write(0, &[0u8; 4096]).await, Err(DiskError::WriteProtected));
        assert_eq!(
            d.ioctl(IoctlCommand::Trim { start: 0, end: 1 }).await,
            Err(DiskError::WriteProtected)
        );
    }

    #[tokio::test]
    async fn trim_is_half_open_and_does_not_program() {
        let mut d = disk().await;
        d.flash_mut().transport_mut().memory_mut().fill(0x00);
        d.flash_mut().transport_mut().clear_log();

        d.ioctl(IoctlCommand::Trim { start: 2, end: 4 }).await.unwrap();

        let sim = d.flash().transport();
        assert_eq!(sim.erases(), 2);
        assert_eq!(sim.page_programs(), 0);
        assert!(sim.memory()[0x2000..0x4000].iter().all(|&b| b == 0xFF));
        assert_eq!(sim.memory()[0x1FFF], 0x00);
        assert_eq!(sim.memory()[0x4000], 0x00);
    }

    #[tokio::test]
    async fn trim_with_reversed_range_is_rejected() {
        let mut d = disk().await;
        assert_eq!(
            d.ioctl(IoctlCommand::Trim { start: 3, end: 2 }).await,
            Err(DiskError::ParameterError)
        );
        assert_eq!(
            d.ioctl(IoctlCommand::Trim { start: 0, end: 257 }).await,
            Err(DiskError::ParameterError)
        );
        assert_eq!(
            d.ioctl(IoctlCommand::Trim { start: 7, end: 7 }).await,
            Ok(IoctlResponse::Done)
        );
    }

    #[tokio::test]
    async fn large_logical_sectors_erase_every_backing_flash_sector() {
        let flash = ready_flash().await;
        let mut d = FlashDisk::new(flash, DiskConfig::with_sector_size(16384)).unwrap();
        assert_eq!(d.sector_count(), 64);
        d.flash_mut().transport_mut().clear_log();
        d.write(1, &[0x42; 16384]).await.unwrap();

        let sim = d.flash().transport();
        let erases = sim
            .opcode_log()
            .iter()
            .filter(|&&o| o == cmd::SECTOR_ERASE_4KB)
            .count();
        assert_eq!(erases, 4);
        assert_eq!(sim.page_programs(), 64);
        assert!(sim.memory()[16384..32768].iter().all(|&b| b == 0x42));
    }

    #[tokio::test]
    async fn block_mode_disk_uses_64k_sectors() {
        let mut flash = SnorDriver::new(
            SimulatedW25q::w25q80(),
            InstantDelay::default(),
            DriverConfig::low_latency().with_sector_mode(SectorMode::Block64K),
        );
        flash.init().await.unwrap();
        let d: Disk = FlashDisk::new(flash, DiskConfig::default()).unwrap();
        assert_eq!(d.sector_size(), 65536);
        assert_eq!(d.sector_count(), 16);
    }
}
