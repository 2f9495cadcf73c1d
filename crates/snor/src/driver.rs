//! W25Q serial NOR flash driver.
//!
//! Maps the generic flash operations (read, program, erase, verify) onto the
//! W25Q command set and enforces the write-enable / busy-poll protocol:
//!
//! ```text
//! program chunk:  WRITE_ENABLE → PAGE_PROGRAM(addr, ≤256 B) → poll SR1.BUSY
//! sector erase:   WRITE_ENABLE → SECTOR_ERASE(addr)          (returns at once)
//! erase progress: query_erase() / wait_erase()               (caller polls)
//! ```
//!
//! Every poll loop is bounded; a device that never clears BUSY yields
//! [`FlashError::Timeout`] and moves the driver to [`DeviceState::Error`].
//!
//! The driver holds no lock. One task at a time may use it; share it between
//! tasks behind a mutex that also covers the bus.

use embedded_hal_async::delay::DelayNs;

use crate::bus::BusTransport;
use crate::config::{DriverConfig, DEFAULT_COMPARE_BUFFER_SIZE};
use crate::descriptor::{DeviceId, DeviceState, FlashDescriptor};
use crate::error::{FailureCause, FlashError};
use crate::w25q::{self, cmd, sr1, sr2};

/// Outcome of [`SnorDriver::query_erase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EraseStatus {
    /// No erase is running.
    Done,
    /// The device is still erasing; poll again after `retry_after_ms`.
    InProgress {
        /// Suggested wait before the next query (always non-zero).
        retry_after_ms: u32,
    },
}

/// Raw Status Register-1 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct StatusRegister(pub u8);

impl StatusRegister {
    /// An erase or program is in progress.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        self.0 & sr1::BUSY != 0
    }

    /// The write-enable latch is set.
    #[must_use]
    pub const fn write_enable_latch(self) -> bool {
        self.0 & sr1::WRITE_ENABLE_LATCH != 0
    }

    /// BP2..BP0 field.
    #[must_use]
    pub const fn block_protect(self) -> u8 {
        (self.0 & sr1::BLOCK_PROTECT).wrapping_shr(2)
    }
}

/// Winbond W25Q driver over a [`BusTransport`].
///
/// `CMP` is the size of the stack buffer used by [`verify_erase`](Self::verify_erase);
/// it must be a power of two no larger than 4096.
pub struct SnorDriver<T, D, const CMP: usize = DEFAULT_COMPARE_BUFFER_SIZE> {
    bus: T,
    delay: D,
    config: DriverConfig,
    descriptor: FlashDescriptor,
    device_id: DeviceId,
    state: DeviceState,
}

impl<T, D, const CMP: usize> SnorDriver<T, D, CMP> {
    const COMPARE_BUFFER_OK: () = assert!(
        CMP.is_power_of_two() && CMP <= w25q::SUB_SECTOR_SIZE as usize,
        "compare buffer size must be a power of two no larger than 4096"
    );

    /// Create a driver. The device is not touched until [`init`](Self::init).
    pub fn new(bus: T, delay: D, config: DriverConfig) -> Self {
        let () = Self::COMPARE_BUFFER_OK;
        Self {
            bus,
            delay,
            config,
            descriptor: FlashDescriptor::unidentified(config.sector_mode.size()),
            device_id: DeviceId::default(),
            state: DeviceState::NotReady,
        }
    }

    /// Current operational state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Geometry of the identified device (sector count is 0 before `init`).
    pub fn descriptor(&self) -> &FlashDescriptor {
        &self.descriptor
    }

    /// Identity read during the last `init`.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Active configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.bus
    }

    /// Mutably borrow the transport.
    ///
    /// Commands issued directly bypass the driver's state tracking.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    /// Give back the transport and the delay provider.
    pub fn release(self) -> (T, D) {
        (self.bus, self.delay)
    }

    fn require_ready<E>(&self) -> Result<(), FlashError<E>> {
        if self.state == DeviceState::Ready {
            Ok(())
        } else {
            Err(FlashError::Busy(self.state))
        }
    }

    /// Rest state after an operation: `Error` if the device stopped answering,
    /// `Ready` for every other outcome.
    fn settle<R, E>(&mut self, result: &Result<R, FlashError<E>>) {
        self.state = match result {
            Err(e) if e.cause() == FailureCause::Timeout => {
                error!("flash device unresponsive, entering error state");
                DeviceState::Error
            }
            _ => DeviceState::Ready,
        };
    }
}

impl<T, D, const CMP: usize> SnorDriver<T, D, CMP>
where
    T: BusTransport,
    D: DelayNs,
{
    /// Identify the device and derive its geometry.
    ///
    /// Also the recovery path from [`DeviceState::Error`].
    ///
    /// # Errors
    ///
    /// - [`FlashError::UnsupportedDevice`] if any identity byte is not whitelisted.
    /// - [`FlashError::QuadEnableFailed`] if the transport needs quad mode and
    ///   the QE bit cannot be set.
    /// - [`FlashError::Busy`] while an erase is still in progress.
    /// - [`FlashError::Transport`] on bus failure.
    pub async fn init(&mut self) -> Result<FlashDescriptor, FlashError<T::Error>> {
        if self.state == DeviceState::Erasing {
            return Err(FlashError::Busy(self.state));
        }

        let mut id = [0u8; 3];
        self.bus
            .receive_after_command(cmd::READ_ID, &mut id)
            .await
            .map_err(FlashError::Transport)?;
        let device_id = DeviceId::from_bytes(id);
        self.device_id = device_id;

        let Some(capacity) = device_id.supported_capacity() else {
            error!("unsupported flash device {}", device_id);
            self.descriptor = FlashDescriptor::unidentified(self.config.sector_mode.size());
            self.state = DeviceState::NotReady;
            return Err(FlashError::UnsupportedDevice(device_id));
        };

        if self.bus.needs_quad_enable() {
            if let Err(e) = self.enable_quad().await {
                self.descriptor = FlashDescriptor::unidentified(self.config.sector_mode.size());
                self.state = if matches!(e, FlashError::Timeout) {
                    DeviceState::Error
                } else {
                    DeviceState::NotReady
                };
                return Err(e);
            }
        }

        self.descriptor = FlashDescriptor::w25q(capacity, self.config.sector_mode.size());
        self.state = DeviceState::Ready;
        info!(
            "W25Q {} identified: {} sectors of {} bytes",
            device_id,
            self.descriptor.sector_count,
            self.descriptor.sector_size
        );
        Ok(self.descriptor)
    }

    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] unless the driver is `Ready`,
    /// [`FlashError::OutOfBounds`] past the end of the device,
    /// [`FlashError::Transport`] on bus failure.
    pub async fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        if !self.descriptor.contains_range(offset, buf.len()) {
            return Err(FlashError::OutOfBounds);
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.state = DeviceState::Reading;
        let opcode = self.bus.read_opcode();
        let result = self
            .bus
            .receive_after_command_address(opcode, offset, buf)
            .await
            .map_err(FlashError::Transport);
        self.settle(&result);
        result
    }

    /// Program `data` at `offset`, split transparently at page boundaries.
    ///
    /// Programming only clears bits; the target range is normally erased first.
    ///
    /// # Errors
    ///
    /// Fails fast on the first page that fails. If earlier pages were already
    /// programmed the error is [`FlashError::PartialTransfer`] with the number
    /// of bytes written; otherwise the page's own error is returned.
    pub async fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        if !self.descriptor.contains_range(offset, data.len()) {
            return Err(FlashError::OutOfBounds);
        }

        self.state = DeviceState::Programming;
        let result = self.program_pages(offset, data).await;
        self.settle(&result);
        result
    }

    async fn program_pages(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError<T::Error>> {
        let page_size = self.descriptor.page_size;
        let opcode = self.bus.program_opcode();
        let mut offset = offset;
        let mut remaining = data;
        let mut done = 0usize;

        while !remaining.is_empty() {
            // Bytes left before the next page boundary.
            let to_boundary = page_size.saturating_sub(offset.checked_rem(page_size).unwrap_or(0)) as usize;
            let (chunk, rest) = remaining.split_at(to_boundary.min(remaining.len()));

            if let Err(e) = self.program_page(opcode, offset, chunk).await {
                if done == 0 {
                    return Err(e);
                }
                warn!("program stopped after {} bytes", done);
                return Err(FlashError::PartialTransfer {
                    completed: done,
                    cause: e.cause(),
                });
            }

            trace!("programmed {} bytes at {:#x}", chunk.len(), offset);
            done = done.saturating_add(chunk.len());
            offset = offset.saturating_add(chunk.len() as u32);
            remaining = rest;
        }
        Ok(())
    }

    async fn program_page(
        &mut self,
        opcode: u8,
        offset: u32,
        chunk: &[u8],
    ) -> Result<(), FlashError<T::Error>> {
        self.write_enable().await?;
        self.bus
            .send_command_address_data(opcode, offset, chunk)
            .await
            .map_err(FlashError::Transport)?;
        self.poll_status().await
    }

    /// Start a whole-chip erase and return without waiting for it.
    ///
    /// Completion is observed through [`query_erase`](Self::query_erase) or
    /// [`wait_erase`](Self::wait_erase).
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] unless `Ready`; [`FlashError::Transport`] on bus failure.
    pub async fn start_erase_all(&mut self) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        self.write_enable().await?;
        self.bus
            .send_command(cmd::CHIP_ERASE)
            .await
            .map_err(FlashError::Transport)?;
        self.state = DeviceState::Erasing;
        debug!("chip erase started");
        Ok(())
    }

    /// Start erasing `sector` and return without waiting for it.
    ///
    /// # Errors
    ///
    /// [`FlashError::OutOfBounds`] for a sector past the end of the device,
    /// [`FlashError::Busy`] unless `Ready`, [`FlashError::Transport`] on bus failure.
    pub async fn start_erase_sector(&mut self, sector: u32) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        let offset = self
            .descriptor
            .sector_offset(sector)
            .ok_or(FlashError::OutOfBounds)?;
        self.start_erase_at(self.config.sector_mode.erase_opcode(), offset)
            .await
    }

    pub(crate) async fn start_erase_at(
        &mut self,
        opcode: u8,
        offset: u32,
    ) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        self.write_enable().await?;
        self.bus
            .send_command_address(opcode, offset)
            .await
            .map_err(FlashError::Transport)?;
        self.state = DeviceState::Erasing;
        debug!("erase {:#x} started at {:#x}", opcode, offset);
        Ok(())
    }

    /// Check whether a previously started erase has finished.
    ///
    /// Reads the status register only while an erase is outstanding; once the
    /// busy bit clears the driver returns to `Ready`.
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] in `NotReady` / `Error`; [`FlashError::Transport`]
    /// on bus failure (the driver returns to `Ready`).
    pub async fn query_erase(&mut self) -> Result<EraseStatus, FlashError<T::Error>> {
        match self.state {
            DeviceState::Erasing => {}
            DeviceState::NotReady | DeviceState::Error => {
                return Err(FlashError::Busy(self.state));
            }
            _ => return Ok(EraseStatus::Done),
        }

        let status = match self.read_status_register().await {
            Ok(s) => s,
            Err(e) => {
                self.state = DeviceState::Ready;
                return Err(FlashError::Transport(e));
            }
        };

        if status.is_busy() {
            return Ok(EraseStatus::InProgress {
                retry_after_ms: w25q::ERASE_POLL_HINT_MS,
            });
        }
        self.state = DeviceState::Ready;
        debug!("erase complete");
        Ok(EraseStatus::Done)
    }

    /// Poll [`query_erase`](Self::query_erase) until the erase finishes.
    ///
    /// # Errors
    ///
    /// [`FlashError::Timeout`] once `erase_timeout_ms` has elapsed with the
    /// device still busy; otherwise the errors of `query_erase`.
    pub async fn wait_erase(&mut self) -> Result<(), FlashError<T::Error>> {
        let mut waited_ms: u32 = 0;
        loop {
            match self.query_erase().await? {
                EraseStatus::Done => return Ok(()),
                EraseStatus::InProgress { retry_after_ms } => {
                    if waited_ms >= self.config.erase_timeout_ms {
                        let result: Result<(), _> = Err(FlashError::Timeout);
                        self.settle(&result);
                        return result;
                    }
                    self.delay.delay_ms(retry_after_ms).await;
                    waited_ms = waited_ms.saturating_add(retry_after_ms);
                }
            }
        }
    }

    /// Check that every byte of `sector` holds the erased value.
    ///
    /// Scans in `CMP`-byte reads and stops at the first mismatch.
    ///
    /// # Errors
    ///
    /// [`FlashError::VerifyFailure`] with the offset of the first non-erased
    /// byte; the driver is `Ready` again when this is returned.
    pub async fn verify_erase(&mut self, sector: u32) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        let start = self
            .descriptor
            .sector_offset(sector)
            .ok_or(FlashError::OutOfBounds)?;

        self.state = DeviceState::Reading;
        let result = self.verify_range(start, self.descriptor.sector_size).await;
        self.settle(&result);
        result
    }

    async fn verify_range(&mut self, start: u32, len: u32) -> Result<(), FlashError<T::Error>> {
        let erased = self.descriptor.erased_value();
        let opcode = self.bus.read_opcode();
        let mut cmpbuf = [0u8; CMP];
        let end = start.saturating_add(len);
        let mut offset = start;

        while offset < end {
            self.bus
                .receive_after_command_address(opcode, offset, &mut cmpbuf)
                .await
                .map_err(FlashError::Transport)?;
            if let Some(pos) = cmpbuf.iter().position(|&b| b != erased) {
                let bad = offset.saturating_add(pos as u32);
                warn!("erase verify failed at {:#x}", bad);
                return Err(FlashError::VerifyFailure { offset: bad });
            }
            offset = offset.saturating_add(CMP as u32);
        }
        Ok(())
    }

    /// Read Status Register-1.
    ///
    /// Allowed in every state, including while an erase is running.
    ///
    /// # Errors
    ///
    /// [`FlashError::Transport`] on bus failure.
    pub async fn read_status(&mut self) -> Result<StatusRegister, FlashError<T::Error>> {
        self.read_status_register()
            .await
            .map_err(FlashError::Transport)
    }

    /// `true` if any block-protect bit is set.
    ///
    /// BP2..BP0 protect a fraction of the array that depends on TB/SEC/CMP;
    /// any non-zero field is treated as "write protected".
    ///
    /// # Errors
    ///
    /// [`FlashError::Transport`] on bus failure.
    pub async fn is_write_protected(&mut self) -> Result<bool, FlashError<T::Error>> {
        Ok(self.read_status().await?.block_protect() != 0)
    }

    /// Read the factory-programmed 64-bit unique ID.
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] unless `Ready`; [`FlashError::Transport`] on bus failure.
    pub async fn read_unique_id(&mut self) -> Result<u64, FlashError<T::Error>> {
        self.require_ready()?;
        // Four dummy bytes precede the ID.
        let mut buf = [0u8; 12];
        self.bus
            .receive_after_command(cmd::READ_UNIQUE_ID, &mut buf)
            .await
            .map_err(FlashError::Transport)?;
        let [_, _, _, _, id @ ..] = buf;
        Ok(u64::from_be_bytes(id))
    }

    /// Enter deep power-down. Only [`release_power_down`](Self::release_power_down) wakes the device.
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] unless `Ready`; [`FlashError::Transport`] on bus failure.
    pub async fn power_down(&mut self) -> Result<(), FlashError<T::Error>> {
        self.require_ready()?;
        self.bus
            .send_command(cmd::POWER_DOWN)
            .await
            .map_err(FlashError::Transport)?;
        self.state = DeviceState::NotReady;
        debug!("flash in deep power-down");
        Ok(())
    }

    /// Leave deep power-down and return to `Ready`.
    ///
    /// # Errors
    ///
    /// [`FlashError::Busy`] if the device was never identified or is not
    /// powered down; [`FlashError::Transport`] on bus failure.
    pub async fn release_power_down(&mut self) -> Result<(), FlashError<T::Error>> {
        let identified =
            self.device_id.supported_capacity().is_some() && self.descriptor.sector_count != 0;
        if self.state != DeviceState::NotReady || !identified {
            return Err(FlashError::Busy(self.state));
        }
        self.bus
            .send_command(cmd::RELEASE_POWER_DOWN)
            .await
            .map_err(FlashError::Transport)?;
        // tRES1: 3 µs before the device accepts other commands.
        self.delay.delay_us(3).await;
        self.state = DeviceState::Ready;
        Ok(())
    }

    async fn write_enable(&mut self) -> Result<(), FlashError<T::Error>> {
        self.bus
            .send_command(cmd::WRITE_ENABLE)
            .await
            .map_err(FlashError::Transport)
    }

    async fn read_status_register(&mut self) -> Result<StatusRegister, T::Error> {
        let mut sts = [0u8; 1];
        self.bus
            .receive_after_command(cmd::READ_STATUS_REGISTER_1, &mut sts)
            .await?;
        let [value] = sts;
        Ok(StatusRegister(value))
    }

    async fn read_status_register_2(&mut self) -> Result<u8, FlashError<T::Error>> {
        let mut sts = [0u8; 1];
        self.bus
            .receive_after_command(cmd::READ_STATUS_REGISTER_2, &mut sts)
            .await
            .map_err(FlashError::Transport)?;
        let [value] = sts;
        Ok(value)
    }

    /// Set the QE bit in Status Register-2 unless it already is.
    async fn enable_quad(&mut self) -> Result<(), FlashError<T::Error>> {
        let status2 = self.read_status_register_2().await?;
        if status2 & sr2::QUAD_ENABLE != 0 {
            return Ok(());
        }
        let status1 = self
            .read_status_register()
            .await
            .map_err(FlashError::Transport)?;
        let status1 = status1.0 & !(sr1::BUSY | sr1::WRITE_ENABLE_LATCH);

        // Two-byte 0x01 writes SR1 and SR2 on every W25Q generation.
        self.write_enable().await?;
        self.bus
            .send_command_data(
                cmd::WRITE_STATUS_REGISTER,
                &[status1, status2 | sr2::QUAD_ENABLE],
            )
            .await
            .map_err(FlashError::Transport)?;
        self.poll_status().await?;

        if self.read_status_register_2().await? & sr2::QUAD_ENABLE == 0 {
            error!("quad enable bit did not latch");
            return Err(FlashError::QuadEnableFailed);
        }
        info!("quad mode enabled");
        Ok(())
    }

    /// Wait for BUSY to clear after a page program or status write.
    async fn poll_status(&mut self) -> Result<(), FlashError<T::Error>> {
        for _ in 0..self.config.max_status_polls {
            if self.config.nice_waiting {
                self.delay.delay_us(self.config.poll_interval_us).await;
            }
            let status = self
                .read_status_register()
                .await
                .map_err(FlashError::Transport)?;
            if !status.is_busy() {
                return Ok(());
            }
        }
        Err(FlashError::Timeout)
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
    use crate::config::SectorMode;
    use crate::mocks::{InstantDelay, SimulatedW25q};

    type Driver = SnorDriver<SimulatedW25q, InstantDelay>;

    async fn ready_driver() -> Driver {
        let mut drv = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig::default(),
        );
        drv.init().await.unwrap();
        drv
    }

    #[test]
    fn status_register_accessors() {
        let s = StatusRegister(sr1::BUSY | sr1::WRITE_ENABLE_LATCH | sr1::BP1);
        assert!(s.is_busy());
        assert!(s.write_enable_latch());
        assert_eq!(s.block_protect(), 0b010);
        assert!(!StatusRegister(0).is_busy());
    }

    #[tokio::test]
    async fn new_driver_is_not_ready_until_init() {
        let mut drv: Driver = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig::default(),
        );
        assert_eq!(drv.state(), DeviceState::NotReady);
        let mut buf = [0u8; 4];
        assert_eq!(
            drv.read(0, &mut buf).await,
            Err(FlashError::Busy(DeviceState::NotReady))
        );
    }

    #[tokio::test]
    async fn init_derives_geometry_from_capacity_code() {
        let drv = ready_driver().await;
        let d = drv.descriptor();
        assert_eq!(d.size, 16 * 1024 * 1024);
        assert_eq!(d.sector_size, 4096);
        assert_eq!(d.size, d.sector_count * d.sector_size);
        assert_eq!(drv.state(), DeviceState::Ready);
        assert_eq!(drv.device_id().to_bytes(), [0xEF, 0x40, 0x18]);
    }

    #[tokio::test]
    async fn init_with_block_mode_uses_64k_sectors() {
        let mut drv: Driver = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig::default().with_sector_mode(SectorMode::Block64K),
        );
        let d = drv.init().await.unwrap();
        assert_eq!(d.sector_size, 65536);
        assert_eq!(d.sector_count, 256);
    }

    #[tokio::test]
    async fn unsupported_manufacturer_is_an_error_not_a_panic() {
        let mut drv: Driver = SnorDriver::new(
            SimulatedW25q::new([0xC2, 0x20, 0x18]),
            InstantDelay::default(),
            DriverConfig::default(),
        );
        let err = drv.init().await.unwrap_err();
        assert_eq!(
            err,
            FlashError::UnsupportedDevice(DeviceId::from_bytes([0xC2, 0x20, 0x18]))
        );
        assert_eq!(drv.state(), DeviceState::NotReady);
    }

    #[tokio::test]
    async fn every_whitelisted_capacity_initialises() {
        for &(code, size) in w25q::SUPPORTED_CAPACITIES {
            let mut drv: Driver = SnorDriver::new(
                SimulatedW25q::new([0xEF, 0x40, code]),
                InstantDelay::default(),
                DriverConfig::default(),
            );
            let d = drv.init().await.unwrap();
            assert_eq!(d.size, size, "capacity code {code:#x}");
            assert_eq!(d.size, d.sector_count * d.sector_size);
            assert_eq!(drv.state(), DeviceState::Ready);
        }
    }

    #[tokio::test]
    async fn unknown_memory_type_or_capacity_fails_init() {
        for id in [[0xEF, 0x60, 0x18], [0xEF, 0x40, 0x17], [0xEF, 0x40, 0x19]] {
            let mut drv: Driver = SnorDriver::new(
                SimulatedW25q::new(id),
                InstantDelay::default(),
                DriverConfig::default(),
            );
            assert_eq!(
                drv.init().await,
                Err(FlashError::UnsupportedDevice(DeviceId::from_bytes(id)))
            );
            assert_eq!(drv.state(), DeviceState::NotReady);
            assert_eq!(drv.descriptor().sector_count, 0);
        }
    }

    #[tokio::test]
    async fn failed_reinit_cannot_be_bypassed_through_power_down() {
        let mut drv = ready_driver().await;
        drv.power_down().await.unwrap();
        // A powered-down part answers read-ID with all ones.
        let err = drv.init().await.unwrap_err();
        assert_eq!(
            err,
            FlashError::UnsupportedDevice(DeviceId::from_bytes([0xFF; 3]))
        );
        assert_eq!(drv.descriptor().sector_count, 0);

        assert_eq!(
            drv.release_power_down().await,
            Err(FlashError::Busy(DeviceState::NotReady))
        );
        assert_eq!(drv.state(), DeviceState::NotReady);
        let mut buf = [0u8; 1];
        assert_eq!(
            drv.read(0, &mut buf).await,
            Err(FlashError::Busy(DeviceState::NotReady))
        );
    }

    #[tokio::test]
    async fn straddling_program_matches_two_aligned_programs() {
        let data: std::vec::Vec<u8> = (0..0x40u8).map(|b| b.wrapping_mul(7)).collect();

        let mut straddled = ready_driver().await;
        straddled.program(0x1E0, &data).await.unwrap();

        let mut split = ready_driver().await;
        split.program(0x1E0, &data[..0x20]).await.unwrap();
        split.program(0x200, &data[0x20..]).await.unwrap();

        assert_eq!(straddled.transport().memory(), split.transport().memory());
    }

    #[tokio::test]
    async fn program_splits_at_page_boundary() {
        let mut drv = ready_driver().await;
        // 0xF0..0x110 straddles the first page boundary.
        let data: std::vec::Vec<u8> = (0..0x20u8).collect();
        drv.program(0xF0, &data).await.unwrap();

        let sim = drv.transport();
        assert_eq!(sim.page_programs(), 2, "one command per page touched");
        let mut back = [0u8; 0x20];
        drv.read(0xF0, &mut back).await.unwrap();
        assert_eq!(&back[..], &data[..]);
    }

    #[tokio::test]
    async fn program_sets_write_enable_before_every_page() {
        let mut drv = ready_driver().await;
        drv.program(0, &[0u8; 600]).await.unwrap();
        let ops = drv.transport().opcode_log();
        let wel = ops.iter().filter(|&&o| o == cmd::WRITE_ENABLE).count();
        let pp = ops.iter().filter(|&&o| o == cmd::PAGE_PROGRAM).count();
        assert_eq!(pp, 3);
        assert_eq!(wel, pp);
    }

    #[tokio::test]
    async fn program_out_of_bounds_is_rejected_before_bus_traffic() {
        let mut drv = ready_driver().await;
        let before = drv.transport().opcode_log().len();
        let size = drv.descriptor().size;
        assert_eq!(
            drv.program(size - 1, &[0, 0]).await,
            Err(FlashError::OutOfBounds)
        );
        assert_eq!(drv.transport().opcode_log().len(), before);
    }

    #[tokio::test]
    async fn program_failure_after_first_page_is_partial() {
        let mut drv = ready_driver().await;
        drv.transport_mut().fail_opcode_after(cmd::PAGE_PROGRAM, 1);
        let err = drv.program(0, &[0u8; 512]).await.unwrap_err();
        assert_eq!(
            err,
            FlashError::PartialTransfer {
                completed: 256,
                cause: FailureCause::Transport
            }
        );
        assert_eq!(drv.state(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn program_failure_on_first_page_keeps_transport_error() {
        let mut drv = ready_driver().await;
        drv.transport_mut().fail_opcode_after(cmd::PAGE_PROGRAM, 0);
        let err = drv.program(0, &[0u8; 16]).await.unwrap_err();
        assert!(matches!(err, FlashError::Transport(_)));
    }

    #[tokio::test]
    async fn stuck_busy_times_out_into_error_state() {
        let mut drv = ready_driver().await;
        drv.transport_mut().set_stuck_busy(true);
        assert_eq!(drv.program(0, &[0u8; 4]).await, Err(FlashError::Timeout));
        assert_eq!(drv.state(), DeviceState::Error);

        // init is the way back once the device answers again.
        drv.transport_mut().set_stuck_busy(false);
        drv.init().await.unwrap();
        assert_eq!(drv.state(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn erase_sector_is_non_blocking_until_queried() {
        let mut drv = ready_driver().await;
        drv.transport_mut().set_erase_busy_polls(3);
        drv.start_erase_sector(2).await.unwrap();
        assert_eq!(drv.state(), DeviceState::Erasing);

        let mut buf = [0u8; 1];
        assert_eq!(
            drv.read(0, &mut buf).await,
            Err(FlashError::Busy(DeviceState::Erasing))
        );

        for _ in 0..3 {
            let status = drv.query_erase().await.unwrap();
            assert!(matches!(status, EraseStatus::InProgress { retry_after_ms } if retry_after_ms > 0));
        }
        assert_eq!(drv.query_erase().await.unwrap(), EraseStatus::Done);
        assert_eq!(drv.state(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn erase_sector_out_of_range() {
        let mut drv = ready_driver().await;
        let count = drv.descriptor().sector_count;
        assert_eq!(
            drv.start_erase_sector(count).await,
            Err(FlashError::OutOfBounds)
        );
        assert_eq!(drv.state(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn wait_erase_times_out_on_stuck_device() {
        let mut drv: Driver = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig {
                erase_timeout_ms: 10,
                ..DriverConfig::default()
            },
        );
        drv.init().await.unwrap();
        drv.start_erase_all().await.unwrap();
        drv.transport_mut().set_stuck_busy(true);
        assert_eq!(drv.wait_erase().await, Err(FlashError::Timeout));
        assert_eq!(drv.state(), DeviceState::Error);
    }

    #[tokio::test]
    async fn verify_erase_reports_first_bad_byte_and_returns_to_ready() {
        let mut drv = ready_driver().await;
        drv.start_erase_sector(1).await.unwrap();
        drv.wait_erase().await.unwrap();
        drv.verify_erase(1).await.unwrap();

        drv.program(4096 + 100, &[0x00]).await.unwrap();
        assert_eq!(
            drv.verify_erase(1).await,
            Err(FlashError::VerifyFailure { offset: 4096 + 100 })
        );
        assert_eq!(drv.state(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn verify_uses_compare_buffer_sized_reads() {
        let mut drv: SnorDriver<SimulatedW25q, InstantDelay, 256> = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig::default(),
        );
        drv.init().await.unwrap();
        let before = drv.transport().reads();
        drv.verify_erase(0).await.unwrap();
        assert_eq!(drv.transport().reads() - before, 4096 / 256);
    }

    #[tokio::test]
    async fn unique_id_skips_dummy_bytes() {
        let mut drv = ready_driver().await;
        assert_eq!(
            drv.read_unique_id().await.unwrap(),
            SimulatedW25q::DEFAULT_UNIQUE_ID
        );
    }

    #[tokio::test]
    async fn power_down_round_trip() {
        let mut drv = ready_driver().await;
        drv.power_down().await.unwrap();
        assert_eq!(drv.state(), DeviceState::NotReady);
        let mut buf = [0u8; 1];
        assert!(drv.read(0, &mut buf).await.is_err());
        drv.release_power_down().await.unwrap();
        assert_eq!(drv.state(), DeviceState::Ready);
        drv.read(0, &mut buf).await.unwrap();
    }

    #[tokio::test]
    async fn write_protect_follows_block_protect_bits() {
        let mut drv = ready_driver().await;
        assert!(!drv.is_write_protected().await.unwrap());
        drv.transport_mut().set_block_protect(0b001);
        assert!(drv.is_write_protected().await.unwrap());
    }

    #[tokio::test]
    async fn nice_waiting_sleeps_between_status_polls() {
        let mut drv = ready_driver().await;
        drv.transport_mut().set_program_busy_polls(2);
        drv.program(0, &[0xAB]).await.unwrap();
        let (_, delay) = drv.release();
        // Three status reads (busy, busy, ready), each preceded by a 1 ms sleep.
        assert_eq!(delay.elapsed_us(), 3_000);
    }

    #[tokio::test]
    async fn low_latency_config_never_sleeps() {
        let mut drv: Driver = SnorDriver::new(
            SimulatedW25q::w25q128(),
            InstantDelay::default(),
            DriverConfig::low_latency(),
        );
        drv.init().await.unwrap();
        drv.transport_mut().set_program_busy_polls(5);
        drv.program(0, &[0xAB; 300]).await.unwrap();
        let (_, delay) = drv.release();
        assert_eq!(delay.elapsed_us(), 0);
    }
}
