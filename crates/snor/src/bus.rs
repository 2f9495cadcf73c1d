//! Bus transport capability.
//!
//! The driver talks to the flash through [`BusTransport`]: a handful of
//! command/address/data primitives. Two transports are provided:
//!
//! - [`SpiTransport`]: classic single-line SPI on top of any
//!   `embedded_hal_async::spi::SpiDevice` (chip-select handled by the device).
//! - [`QuadTransport`]: a multi-line ("wide") SPI controller such as the
//!   STM32 QUADSPI, reached through the [`WideSpi`] trait.
//!
//! The transport also decides which read and program opcodes suit its line
//! configuration, so the driver itself never branches on bus mode.

use embedded_hal_async::spi::{Operation, SpiDevice};

use crate::w25q::{self, cmd};

/// Command/address/data exchange primitives used by the flash driver.
///
/// Each call is one complete bus transaction (chip-select asserted for its
/// whole duration). Addresses are 24-bit.
pub trait BusTransport {
    /// Error type
    type Error: core::fmt::Debug;

    /// Send a bare opcode.
    async fn send_command(&mut self, opcode: u8) -> Result<(), Self::Error>;

    /// Send an opcode followed by an address, no data phase.
    async fn send_command_address(&mut self, opcode: u8, addr: u32) -> Result<(), Self::Error>;

    /// Send an opcode followed by data bytes, no address phase.
    async fn send_command_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Send an opcode, an address and a data burst.
    async fn send_command_address_data(
        &mut self,
        opcode: u8,
        addr: u32,
        data: &[u8],
    ) -> Result<(), Self::Error>;

    /// Send an opcode, then clock in `buf.len()` bytes.
    async fn receive_after_command(
        &mut self,
        opcode: u8,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Send an opcode and an address, then clock in `buf.len()` bytes.
    async fn receive_after_command_address(
        &mut self,
        opcode: u8,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Opcode used for array reads on this transport.
    fn read_opcode(&self) -> u8 {
        cmd::READ
    }

    /// Opcode used for page programs on this transport.
    fn program_opcode(&self) -> u8 {
        cmd::PAGE_PROGRAM
    }

    /// `true` if the read/program opcodes drive IO2/IO3, so the QE bit in
    /// Status Register-2 must be set before they work.
    fn needs_quad_enable(&self) -> bool {
        false
    }
}

/// Opcode plus 24-bit big-endian address.
fn header(opcode: u8, addr: u32) -> [u8; 4] {
    let [a2, a1, a0] = w25q::address_bytes(addr);
    [opcode, a2, a1, a0]
}

// ── Single-line SPI ─────────────────────────────────────────────────────────

/// [`BusTransport`] over a plain SPI device.
///
/// Uses the `0x03` read command, so any SPI clock up to the part's `f_R`
/// (50 MHz on W25Q128JV) works without dummy cycles.
pub struct SpiTransport<D> {
    spi: D,
}

impl<D: SpiDevice> SpiTransport<D> {
    /// Wrap an SPI device whose chip-select is wired to the flash.
    pub fn new(spi: D) -> Self {
        Self { spi }
    }

    /// Give back the SPI device.
    pub fn release(self) -> D {
        self.spi
    }
}

impl<D: SpiDevice> BusTransport for SpiTransport<D> {
    type Error = D::Error;

    async fn send_command(&mut self, opcode: u8) -> Result<(), Self::Error> {
        self.spi.write(&[opcode]).await
    }

    async fn send_command_address(&mut self, opcode: u8, addr: u32) -> Result<(), Self::Error> {
        self.spi.write(&header(opcode, addr)).await
    }

    async fn send_command_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), Self::Error> {
        let head = [opcode];
        self.spi
            .transaction(&mut [Operation::Write(&head), Operation::Write(data)])
            .await
    }

    async fn send_command_address_data(
        &mut self,
        opcode: u8,
        addr: u32,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        let head = header(opcode, addr);
        self.spi
            .transaction(&mut [Operation::Write(&head), Operation::Write(data)])
            .await
    }

    async fn receive_after_command(
        &mut self,
        opcode: u8,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        let head = [opcode];
        self.spi
            .transaction(&mut [Operation::Write(&head), Operation::Read(buf)])
            .await
    }

    async fn receive_after_command_address(
        &mut self,
        opcode: u8,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        let head = header(opcode, addr);
        self.spi
            .transaction(&mut [Operation::Write(&head), Operation::Read(buf)])
            .await
    }
}

// ── Wide (dual / quad) SPI ──────────────────────────────────────────────────

/// Number of data lines driven during one phase of a wide-SPI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineMode {
    /// Phase skipped.
    None,
    /// One line (IO0 out, IO1 in).
    Single,
    /// Two lines.
    Dual,
    /// Four lines.
    Quad,
}

/// One command as seen by a wide-SPI controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WideCommand {
    /// Instruction byte.
    pub opcode: u8,
    /// Lines used to send the instruction.
    pub opcode_lines: LineMode,
    /// 24-bit address, if the command has an address phase.
    pub address: Option<u32>,
    /// Lines used to send the address.
    pub address_lines: LineMode,
    /// Alternate byte sent right after the address (the W25Q "M7-0" mode bits).
    pub alternate: Option<u8>,
    /// Lines used to send the alternate byte.
    pub alternate_lines: LineMode,
    /// Dummy clock cycles between the alternate (or address) and data phases.
    pub dummy_cycles: u8,
    /// Lines used for the data phase.
    pub data_lines: LineMode,
}

impl WideCommand {
    /// Single-line instruction, no address, no data.
    #[must_use]
    pub const fn instruction(opcode: u8) -> Self {
        Self {
            opcode,
            opcode_lines: LineMode::Single,
            address: None,
            address_lines: LineMode::None,
            alternate: None,
            alternate_lines: LineMode::None,
            dummy_cycles: 0,
            data_lines: LineMode::None,
        }
    }

    /// Add a single-line address phase.
    #[must_use]
    pub const fn with_address(self, addr: u32) -> Self {
        Self {
            address: Some(addr),
            address_lines: LineMode::Single,
            ..self
        }
    }

    /// Add a data phase on `lines`.
    #[must_use]
    pub const fn with_data(self, lines: LineMode) -> Self {
        Self {
            data_lines: lines,
            ..self
        }
    }
}

/// A multi-line SPI controller able to run indirect-mode commands.
///
/// Implemented by the board support code on top of the MCU's QUADSPI/OCTOSPI
/// peripheral; this crate never touches peripheral registers.
pub trait WideSpi {
    /// Error type
    type Error: core::fmt::Debug;

    /// Run a command with no data phase.
    async fn command(&mut self, cmd: &WideCommand) -> Result<(), Self::Error>;

    /// Run a command and send `data` in its data phase.
    async fn send(&mut self, cmd: &WideCommand, data: &[u8]) -> Result<(), Self::Error>;

    /// Run a command and receive `buf.len()` bytes in its data phase.
    async fn receive(&mut self, cmd: &WideCommand, buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl LineMode {
    /// Clock cycles needed to shift one byte on these lines.
    #[must_use]
    pub const fn cycles_per_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Single => 8,
            Self::Dual => 4,
            Self::Quad => 2,
        }
    }
}

/// Data-phase width used for array reads and page programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusWidth {
    /// `0x0B` fast read, `0x02` page program.
    Single,
    /// `0xBB` fast read dual I/O, `0x02` page program.
    Dual,
    /// `0xEB` fast read quad I/O, `0x32` quad page program.
    ///
    /// Requires the QE bit in Status Register-2; the driver sets it during
    /// `init`.
    #[default]
    Quad,
}

/// Wide-SPI transport configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QuadConfig {
    width: BusWidth,
    read_dummy_cycles: u8,
}

impl BusWidth {
    /// Lines used by the address and data phases of a fast read.
    #[must_use]
    pub const fn lines(self) -> LineMode {
        match self {
            Self::Single => LineMode::Single,
            Self::Dual => LineMode::Dual,
            Self::Quad => LineMode::Quad,
        }
    }

    /// Cycles taken by the mode byte of the I/O fast reads; zero for `0x0B`.
    #[must_use]
    pub const fn mode_cycles(self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Dual | Self::Quad => self.lines().cycles_per_byte(),
        }
    }
}

impl QuadConfig {
    /// Longest dummy phase the W25Q fast-read commands accept.
    pub const MAX_DUMMY_CYCLES: u8 = 15;

    /// Validate and build a configuration.
    ///
    /// `read_dummy_cycles` counts every clock between address and data,
    /// including the mode byte of the dual/quad I/O reads (4 and 2 cycles).
    ///
    /// # Errors
    ///
    /// `read_dummy_cycles` must be within `1..=15` and cover the mode byte.
    pub fn new(width: BusWidth, read_dummy_cycles: u8) -> Result<Self, &'static str> {
        if read_dummy_cycles == 0 || read_dummy_cycles > Self::MAX_DUMMY_CYCLES {
            return Err("read dummy cycles must be within 1..=15");
        }
        if read_dummy_cycles < width.mode_cycles() {
            return Err("read dummy cycles shorter than the mode byte");
        }
        Ok(Self {
            width,
            read_dummy_cycles,
        })
    }

    /// W25Q128JV at up to 104 MHz: quad I/O read, 2 mode + 4 dummy cycles.
    #[must_use]
    pub const fn w25q_quad() -> Self {
        Self {
            width: BusWidth::Quad,
            read_dummy_cycles: 6,
        }
    }

    /// Data-phase width.
    #[must_use]
    pub const fn width(&self) -> BusWidth {
        self.width
    }

    /// Cycles between address and read data, mode byte included.
    #[must_use]
    pub const fn read_dummy_cycles(&self) -> u8 {
        self.read_dummy_cycles
    }
}

impl Default for QuadConfig {
    fn default() -> Self {
        Self::w25q_quad()
    }
}

/// [`BusTransport`] over a [`WideSpi`] controller.
pub struct QuadTransport<W> {
    bus: W,
    config: QuadConfig,
}

impl<W: WideSpi> QuadTransport<W> {
    /// Wrap a wide-SPI controller.
    pub fn new(bus: W, config: QuadConfig) -> Self {
        Self { bus, config }
    }

    /// Give back the controller.
    pub fn release(self) -> W {
        self.bus
    }

    /// Active configuration.
    pub fn config(&self) -> QuadConfig {
        self.config
    }

    /// Command descriptor for an addressed read with `opcode`.
    ///
    /// The configured fast-read opcode gets the wide address/data phases and
    /// dummy cycles; anything else is issued as a plain single-line read.
    /// The I/O reads drive the mode byte explicitly so the part never latches
    /// continuous read mode from floating lines.
    fn read_command(&self, opcode: u8, addr: u32) -> WideCommand {
        if opcode != self.read_opcode() {
            return WideCommand::instruction(opcode)
                .with_address(addr)
                .with_data(LineMode::Single);
        }
        let width = self.config.width;
        let lines = width.lines();
        let mode_cycles = width.mode_cycles();
        let (alternate, alternate_lines) = if mode_cycles == 0 {
            (None, LineMode::None)
        } else {
            (Some(w25q::READ_MODE_BITS), lines)
        };
        WideCommand {
            opcode,
            opcode_lines: LineMode::Single,
            address: Some(addr),
            address_lines: lines,
            alternate,
            alternate_lines,
            dummy_cycles: self.config.read_dummy_cycles.saturating_sub(mode_cycles),
            data_lines: lines,
        }
    }

    /// Command descriptor for an addressed write with `opcode`.
    fn program_command(&self, opcode: u8, addr: u32) -> WideCommand {
        let data_lines = if opcode == cmd::QUAD_PAGE_PROGRAM {
            LineMode::Quad
        } else {
            LineMode::Single
        };
        WideCommand::instruction(opcode)
            .with_address(addr)
            .with_data(data_lines)
    }
}

impl<W: WideSpi> BusTransport for QuadTransport<W> {
    type Error = W::Error;

    async fn send_command(&mut self, opcode: u8) -> Result<(), Self::Error> {
        self.bus.command(&WideCommand::instruction(opcode)).await
    }

    async fn send_command_address(&mut self, opcode: u8, addr: u32) -> Result<(), Self::Error> {
        self.bus
            .command(&WideCommand::instruction(opcode).with_address(addr))
            .await
    }

    async fn send_command_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), Self::Error> {
        let command = WideCommand::instruction(opcode).with_data(LineMode::Single);
        self.bus.send(&command, data).await
    }

    async fn send_command_address_data(
        &mut self,
        opcode: u8,
        addr: u32,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        let command = self.program_command(opcode, addr);
        self.bus.send(&command, data).await
    }

    async fn receive_after_command(
        &mut self,
        opcode: u8,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        let command = WideCommand::instruction(opcode).with_data(LineMode::Single);
        self.bus.receive(&command, buf).await
    }

    async fn receive_after_command_address(
        &mut self,
        opcode: u8,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<(), Self::Error> {
        let command = self.read_command(opcode, addr);
        self.bus.receive(&command, buf).await
    }

    fn read_opcode(&self) -> u8 {
        match self.config.width {
            BusWidth::Single => cmd::FAST_READ,
            BusWidth::Dual => cmd::FAST_READ_DUAL_IO,
            BusWidth::Quad => cmd::FAST_READ_QUAD_IO,
        }
    }

    fn program_opcode(&self) -> u8 {
        match self.config.width {
            BusWidth::Quad => cmd::QUAD_PAGE_PROGRAM,
            BusWidth::Single | BusWidth::Dual => cmd::PAGE_PROGRAM,
        }
    }

    fn needs_quad_enable(&self) -> bool {
        self.config.width == BusWidth::Quad
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

    /// Records every SPI transaction as the flat list of bytes written.
    #[derive(Default)]
    struct RecordingSpi {
        writes: std::vec::Vec<std::vec::Vec<u8>>,
        read_fill: u8,
    }

    impl embedded_hal_async::spi::ErrorType for RecordingSpi {
        type Error = core::convert::Infallible;
    }

    impl SpiDevice for RecordingSpi {
        async fn transaction(
            &mut self,
            operations: &mut [Operation<'_, u8>],
        ) -> Result<(), Self::Error> {
            let mut written = std::vec::Vec::new();
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(data) => written.extend_from_slice(data),
                    Operation::Read(buf) => buf.fill(self.read_fill),
                    Operation::Transfer(read, write) => {
                        written.extend_from_slice(write);
                        read.fill(self.read_fill);
                    }
                    Operation::TransferInPlace(buf) => {
                        written.extend_from_slice(buf);
                        buf.fill(self.read_fill);
                    }
                    Operation::DelayNs(_) => {}
                }
            }
            self.writes.push(written);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWide {
        commands: std::vec::Vec<WideCommand>,
    }

    impl WideSpi for RecordingWide {
        type Error = core::convert::Infallible;

        async fn command(&mut self, cmd: &WideCommand) -> Result<(), Self::Error> {
            self.commands.push(*cmd);
            Ok(())
        }

        async fn send(&mut self, cmd: &WideCommand, _data: &[u8]) -> Result<(), Self::Error> {
            self.commands.push(*cmd);
            Ok(())
        }

        async fn receive(&mut self, cmd: &WideCommand, buf: &mut [u8]) -> Result<(), Self::Error> {
            self.commands.push(*cmd);
            buf.fill(0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn spi_address_is_sent_big_endian_after_opcode() {
        let mut bus = SpiTransport::new(RecordingSpi::default());
        bus.send_command_address(cmd::SECTOR_ERASE_4KB, 0x0001_2000)
            .await
            .unwrap();
        let spi = bus.release();
        assert_eq!(spi.writes, vec![vec![0x20, 0x01, 0x20, 0x00]]);
    }

    #[tokio::test]
    async fn spi_program_is_one_transaction_with_data() {
        let mut bus = SpiTransport::new(RecordingSpi::default());
        bus.send_command_address_data(cmd::PAGE_PROGRAM, 0x100, &[0xAA, 0x55])
            .await
            .unwrap();
        let spi = bus.release();
        assert_eq!(spi.writes.len(), 1, "header and data share one chip-select");
        assert_eq!(spi.writes[0], vec![0x02, 0x00, 0x01, 0x00, 0xAA, 0x55]);
    }

    #[tokio::test]
    async fn spi_receive_fills_buffer_after_opcode() {
        let mut bus = SpiTransport::new(RecordingSpi {
            read_fill: 0x5A,
            ..Default::default()
        });
        let mut buf = [0u8; 3];
        bus.receive_after_command(cmd::READ_ID, &mut buf).await.unwrap();
        assert_eq!(buf, [0x5A; 3]);
        assert_eq!(bus.release().writes, vec![vec![cmd::READ_ID]]);
    }

    #[test]
    fn spi_transport_uses_plain_read_and_program() {
        let bus = SpiTransport::new(RecordingSpi::default());
        assert_eq!(bus.read_opcode(), cmd::READ);
        assert_eq!(bus.program_opcode(), cmd::PAGE_PROGRAM);
    }

    #[test]
    fn quad_config_rejects_out_of_range_dummy_cycles() {
        assert!(QuadConfig::new(BusWidth::Quad, 0).is_err());
        assert!(QuadConfig::new(BusWidth::Quad, 16).is_err());
        assert!(QuadConfig::new(BusWidth::Quad, 2).is_ok());
        assert!(QuadConfig::new(BusWidth::Quad, 15).is_ok());
    }

    #[test]
    fn quad_transport_opcodes_follow_width() {
        let quad = QuadTransport::new(RecordingWide::default(), QuadConfig::w25q_quad());
        assert_eq!(quad.read_opcode(), cmd::FAST_READ_QUAD_IO);
        assert_eq!(quad.program_opcode(), cmd::QUAD_PAGE_PROGRAM);

        let dual = QuadTransport::new(
            RecordingWide::default(),
            QuadConfig::new(BusWidth::Dual, 4).unwrap(),
        );
        assert_eq!(dual.read_opcode(), cmd::FAST_READ_DUAL_IO);
        assert_eq!(dual.program_opcode(), cmd::PAGE_PROGRAM);

        let single = QuadTransport::new(
            RecordingWide::default(),
            QuadConfig::new(BusWidth::Single, 8).unwrap(),
        );
        assert_eq!(single.read_opcode(), cmd::FAST_READ);
    }

    #[tokio::test]
    async fn quad_read_uses_four_lines_and_dummy_cycles() {
        let mut bus = QuadTransport::new(RecordingWide::default(), QuadConfig::w25q_quad());
        let op = bus.read_opcode();
        let mut buf = [0u8; 16];
        bus.receive_after_command_address(op, 0x40, &mut buf)
            .await
            .unwrap();
        let issued = bus.release().commands;
        assert_eq!(issued.len(), 1);
        let c = issued[0];
        assert_eq!(c.opcode, cmd::FAST_READ_QUAD_IO);
        assert_eq!(c.opcode_lines, LineMode::Single);
        assert_eq!(c.address, Some(0x40));
        assert_eq!(c.address_lines, LineMode::Quad);
        assert_eq!(c.data_lines, LineMode::Quad);
        assert_eq!(c.alternate, Some(w25q::READ_MODE_BITS));
        assert_eq!(c.alternate_lines, LineMode::Quad);
        assert_eq!(c.dummy_cycles, 4, "2 of the 6 configured cycles carry the mode byte");
    }

    #[tokio::test]
    async fn dual_read_drives_mode_byte_on_two_lines() {
        let config = QuadConfig::new(BusWidth::Dual, 4).unwrap();
        let mut bus = QuadTransport::new(RecordingWide::default(), config);
        let op = bus.read_opcode();
        let mut buf = [0u8; 4];
        bus.receive_after_command_address(op, 0, &mut buf)
            .await
            .unwrap();
        let c = bus.release().commands[0];
        assert_eq!(c.alternate, Some(w25q::READ_MODE_BITS));
        assert_eq!(c.alternate_lines, LineMode::Dual);
        assert_eq!(c.dummy_cycles, 0);
    }

    #[tokio::test]
    async fn single_fast_read_has_no_mode_byte() {
        let config = QuadConfig::new(BusWidth::Single, 8).unwrap();
        let mut bus = QuadTransport::new(RecordingWide::default(), config);
        let op = bus.read_opcode();
        let mut buf = [0u8; 4];
        bus.receive_after_command_address(op, 0, &mut buf)
            .await
            .unwrap();
        let c = bus.release().commands[0];
        assert_eq!(c.alternate, None);
        assert_eq!(c.dummy_cycles, 8);
    }

    #[test]
    fn quad_config_rejects_dummy_phase_shorter_than_mode_byte() {
        assert!(QuadConfig::new(BusWidth::Quad, 1).is_err());
        assert!(QuadConfig::new(BusWidth::Dual, 3).is_err());
        assert!(QuadConfig::new(BusWidth::Single, 1).is_ok());
    }

    #[test]
    fn only_quad_width_needs_quad_enable() {
        let quad = QuadTransport::new(RecordingWide::default(), QuadConfig::w25q_quad());
        assert!(quad.needs_quad_enable());
        let dual = QuadTransport::new(
            RecordingWide::default(),
            QuadConfig::new(BusWidth::Dual, 4).unwrap(),
        );
        assert!(!dual.needs_quad_enable());
        assert!(!SpiTransport::new(RecordingSpi::default()).needs_quad_enable());
    }

    #[tokio::test]
    async fn spi_status_write_is_one_transaction() {
        let mut bus = SpiTransport::new(RecordingSpi::default());
        bus.send_command_data(cmd::WRITE_STATUS_REGISTER, &[0x00, 0x02])
            .await
            .unwrap();
        assert_eq!(bus.release().writes, vec![vec![0x01, 0x00, 0x02]]);
    }

    #[tokio::test]
    async fn quad_status_read_stays_single_line() {
        let mut bus = QuadTransport::new(RecordingWide::default(), QuadConfig::w25q_quad());
        let mut sts = [0u8; 1];
        bus.receive_after_command(cmd::READ_STATUS_REGISTER_1, &mut sts)
            .await
            .unwrap();
        let c = bus.release().commands[0];
        assert_eq!(c.data_lines, LineMode::Single);
        assert_eq!(c.address, None);
        assert_eq!(c.dummy_cycles, 0);
    }

    #[tokio::test]
    async fn quad_program_sends_data_on_four_lines() {
        let mut bus = QuadTransport::new(RecordingWide::default(), QuadConfig::w25q_quad());
        let op = bus.program_opcode();
        bus.send_command_address_data(op, 0x200, &[1, 2, 3])
            .await
            .unwrap();
        let c = bus.release().commands[0];
        assert_eq!(c.opcode, cmd::QUAD_PAGE_PROGRAM);
        assert_eq!(c.address_lines, LineMode::Single);
        assert_eq!(c.data_lines, LineMode::Quad);
    }
}
