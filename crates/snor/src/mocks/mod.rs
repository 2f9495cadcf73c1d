//! Simulated W25Q device for host tests.
//!
//! [`SimulatedW25q`] models the parts of the chip the driver relies on: the
//! write-enable latch, a busy bit that clears after a configurable number of
//! status reads, NOR programming (bits only clear), page wrap-around, deep
//! power-down and the Quad Enable bit (quad commands are ignored while it is
//! clear, as on a real part). It speaks every transport level the crate supports, so a
//! test can plug it in as a [`BusTransport`], an `embedded-hal-async`
//! [`SpiDevice`] or a [`WideSpi`] controller.
//!
//! Fault injection covers transport failures, a busy bit that never clears and
//! bytes that refuse to erase.

#![cfg(any(test, feature = "std"))]
#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::vec;
use std::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use crate::bus::{BusTransport, WideCommand, WideSpi};
use crate::w25q::{self, cmd, sr1, sr2};

/// Error produced by the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// A fault armed through one of the `fail_*` methods fired.
    Injected,
    /// The transaction shape is not one a W25Q understands.
    Unsupported,
}

impl embedded_hal_async::spi::Error for SimError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// In-memory W25Q.
pub struct SimulatedW25q {
    id: [u8; 3],
    memory: Vec<u8>,
    unique_id: u64,
    protect_bits: u8,
    quad_enabled: bool,
    status_locked: bool,
    write_enabled: bool,
    busy_remaining: u32,
    stuck_busy: bool,
    powered_down: bool,
    program_busy_polls: u32,
    erase_busy_polls: u32,
    stuck_bytes: Vec<(usize, u8)>,
    fail_opcode: Option<(u8, usize)>,
    fail_after: Option<usize>,
    opcode_log: Vec<u8>,
    wide_log: Vec<WideCommand>,
    page_programs: usize,
    erases: usize,
    reads: usize,
}

impl SimulatedW25q {
    /// Unique ID returned by `0x4B` unless overridden.
    pub const DEFAULT_UNIQUE_ID: u64 = 0xD267_1C8A_3B5E_9904;

    /// Device answering read-ID with `id`.
    ///
    /// The array is sized from the capacity code; unknown codes get 1 MB.
    pub fn new(id: [u8; 3]) -> Self {
        let [_, _, capacity] = id;
        let size = w25q::capacity_bytes(capacity).unwrap_or(0x0010_0000);
        Self {
            id,
            memory: vec![w25q::ERASED_VALUE; size as usize],
            unique_id: Self::DEFAULT_UNIQUE_ID,
            protect_bits: 0,
            quad_enabled: false,
            status_locked: false,
            write_enabled: false,
            busy_remaining: 0,
            stuck_busy: false,
            powered_down: false,
            program_busy_polls: 1,
            erase_busy_polls: 2,
            stuck_bytes: Vec::new(),
            fail_opcode: None,
            fail_after: None,
            opcode_log: Vec::new(),
            wide_log: Vec::new(),
            page_programs: 0,
            erases: 0,
            reads: 0,
        }
    }

    /// 1 MB W25Q80.
    pub fn w25q80() -> Self {
        Self::new([0xEF, 0x40, 0x14])
    }

    /// 16 MB W25Q128.
    pub fn w25q128() -> Self {
        Self::new([0xEF, 0x40, 0x18])
    }

    /// Array contents.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Mutable array contents, for seeding data behind the driver's back.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    /// Every opcode received, in order (including failed transactions).
    pub fn opcode_log(&self) -> &[u8] {
        &self.opcode_log
    }

    /// Every command received through [`WideSpi`], in order.
    pub fn wide_log(&self) -> &[WideCommand] {
        &self.wide_log
    }

    /// Forget logged opcodes and wide commands.
    pub fn clear_log(&mut self) {
        self.opcode_log.clear();
        self.wide_log.clear();
    }

    /// Number of accepted page-program commands.
    pub fn page_programs(&self) -> usize {
        self.page_programs
    }

    /// Number of accepted erase commands (sector, block and chip).
    pub fn erases(&self) -> usize {
        self.erases
    }

    /// Number of array reads.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// `true` while in deep power-down.
    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    /// Status reads that report BUSY after each page program.
    pub fn set_program_busy_polls(&mut self, polls: u32) {
        self.program_busy_polls = polls;
    }

    /// Status reads that report BUSY after each erase.
    pub fn set_erase_busy_polls(&mut self, polls: u32) {
        self.erase_busy_polls = polls;
    }

    /// Keep BUSY set regardless of the countdown.
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// Set the BP2..BP0 field of Status Register-1.
    pub fn set_block_protect(&mut self, bits: u8) {
        self.protect_bits = (bits << 2) & sr1::BLOCK_PROTECT;
    }

    /// Set or clear the QE bit of Status Register-2. Parts leave the factory
    /// with it clear unless ordered as quad-enabled.
    pub fn set_quad_enable(&mut self, enabled: bool) {
        self.quad_enabled = enabled;
    }

    /// Current QE bit.
    pub fn quad_enabled(&self) -> bool {
        self.quad_enabled
    }

    /// Ignore Write Status Register commands, as with SRP1:SRP0 set.
    pub fn set_status_locked(&mut self, locked: bool) {
        self.status_locked = locked;
    }

    /// Override the unique ID.
    pub fn set_unique_id(&mut self, id: u64) {
        self.unique_id = id;
    }

    /// Make the byte at `offset` read back as `value` after every erase.
    pub fn stick_byte(&mut self, offset: u32, value: u8) {
        self.stuck_bytes.push((offset as usize, value));
    }

    /// Fail the first transaction with `opcode` after letting `skip` of them through.
    ///
    /// One-shot: later transactions succeed again.
    pub fn fail_opcode_after(&mut self, opcode: u8, skip: usize) {
        self.fail_opcode = Some((opcode, skip));
    }

    /// Fail the transaction after the next `skip` ones, whatever its opcode.
    ///
    /// One-shot.
    pub fn fail_after(&mut self, skip: usize) {
        self.fail_after = Some(skip);
    }

    fn is_busy(&self) -> bool {
        self.stuck_busy || self.busy_remaining > 0
    }

    /// Log the opcode and fire any armed fault.
    fn begin(&mut self, opcode: u8) -> Result<(), SimError> {
        self.opcode_log.push(opcode);

        if let Some(skip) = self.fail_after {
            if skip == 0 {
                self.fail_after = None;
                return Err(SimError::Injected);
            }
            self.fail_after = Some(skip - 1);
        }

        if let Some((target, skip)) = self.fail_opcode {
            if target == opcode {
                if skip == 0 {
                    self.fail_opcode = None;
                    return Err(SimError::Injected);
                }
                self.fail_opcode = Some((target, skip - 1));
            }
        }
        Ok(())
    }

    fn index(&self, addr: u32) -> usize {
        addr as usize % self.memory.len()
    }

    fn erase_region(&mut self, start: u32, len: u32) {
        let base = self.index(start & !(len - 1));
        let end = (base + len as usize).min(self.memory.len());
        self.memory[base..end].fill(w25q::ERASED_VALUE);
        for &(offset, value) in &self.stuck_bytes {
            if (base..end).contains(&offset) {
                self.memory[offset] = value;
            }
        }
        self.erases += 1;
        self.write_enabled = false;
        self.busy_remaining = self.erase_busy_polls;
    }

    fn exec_command(&mut self, opcode: u8) {
        if self.powered_down {
            if opcode == cmd::RELEASE_POWER_DOWN {
                self.powered_down = false;
            }
            return;
        }
        if self.is_busy() {
            return;
        }
        match opcode {
            cmd::WRITE_ENABLE => self.write_enabled = true,
            cmd::WRITE_DISABLE => self.write_enabled = false,
            cmd::CHIP_ERASE if self.write_enabled => {
                let len = self.memory.len() as u32;
                self.erase_region(0, len);
            }
            cmd::POWER_DOWN => self.powered_down = true,
            _ => {}
        }
    }

    fn exec_erase(&mut self, opcode: u8, addr: u32) {
        if self.powered_down || self.is_busy() || !self.write_enabled {
            return;
        }
        match opcode {
            cmd::SECTOR_ERASE_4KB => self.erase_region(addr, w25q::SUB_SECTOR_SIZE),
            cmd::BLOCK_ERASE_32KB => self.erase_region(addr, 0x8000),
            cmd::BLOCK_ERASE_64KB => self.erase_region(addr, w25q::BLOCK_SIZE),
            _ => {}
        }
    }

    fn exec_write_status(&mut self, data: &[u8]) {
        if self.powered_down || self.is_busy() || !self.write_enabled {
            return;
        }
        if !self.status_locked {
            if let Some(&status1) = data.first() {
                self.protect_bits = status1 & sr1::BLOCK_PROTECT;
            }
            if let Some(&status2) = data.get(1) {
                self.quad_enabled = status2 & sr2::QUAD_ENABLE != 0;
            }
        }
        self.write_enabled = false;
        self.busy_remaining = self.program_busy_polls;
    }

    fn exec_program(&mut self, opcode: u8, addr: u32, data: &[u8]) {
        if self.powered_down || self.is_busy() || !self.write_enabled {
            return;
        }
        let accepted = match opcode {
            cmd::PAGE_PROGRAM => true,
            cmd::QUAD_PAGE_PROGRAM => self.quad_enabled,
            _ => false,
        };
        if !accepted {
            return;
        }
        // Bytes past the page end wrap to the start of the same page.
        let page = addr & !(w25q::PAGE_SIZE - 1);
        for (i, &byte) in data.iter().enumerate() {
            let column = (addr as usize + i) % w25q::PAGE_SIZE as usize;
            let idx = self.index(page + column as u32);
            self.memory[idx] &= byte;
        }
        self.page_programs += 1;
        self.write_enabled = false;
        self.busy_remaining = self.program_busy_polls;
    }

    fn exec_receive(&mut self, opcode: u8, buf: &mut [u8]) {
        if opcode == cmd::READ_STATUS_REGISTER_1 && !self.powered_down {
            let mut status = self.protect_bits;
            if self.write_enabled {
                status |= sr1::WRITE_ENABLE_LATCH;
            }
            if self.is_busy() {
                status |= sr1::BUSY;
            }
            self.busy_remaining = self.busy_remaining.saturating_sub(1);
            buf.fill(status);
            return;
        }
        buf.fill(0xFF);
        if self.powered_down || self.is_busy() {
            return;
        }
        match opcode {
            cmd::READ_STATUS_REGISTER_2 => {
                buf.fill(if self.quad_enabled { sr2::QUAD_ENABLE } else { 0 });
            }
            cmd::READ_ID => {
                for (dst, src) in buf.iter_mut().zip(self.id) {
                    *dst = src;
                }
            }
            cmd::READ_UNIQUE_ID => {
                let mut reply = [0u8; 12];
                reply[4..].copy_from_slice(&self.unique_id.to_be_bytes());
                for (dst, src) in buf.iter_mut().zip(reply) {
                    *dst = src;
                }
            }
            _ => {}
        }
    }

    fn exec_read(&mut self, opcode: u8, addr: u32, buf: &mut [u8]) {
        buf.fill(0xFF);
        if self.powered_down || self.is_busy() {
            return;
        }
        let accepted = match opcode {
            cmd::READ | cmd::FAST_READ | cmd::FAST_READ_DUAL_OUTPUT | cmd::FAST_READ_DUAL_IO => true,
            cmd::FAST_READ_QUAD_OUTPUT | cmd::FAST_READ_QUAD_IO => self.quad_enabled,
            _ => false,
        };
        if !accepted {
            return;
        }
        for (i, dst) in buf.iter_mut().enumerate() {
            *dst = self.memory[self.index(addr.wrapping_add(i as u32))];
        }
        self.reads += 1;
    }

    fn spi_write(&mut self, tx: &[u8]) -> Result<(), SimError> {
        match *tx {
            [cmd::WRITE_STATUS_REGISTER, ref data @ ..] => {
                self.begin(cmd::WRITE_STATUS_REGISTER)?;
                self.exec_write_status(data);
            }
            [opcode] => {
                self.begin(opcode)?;
                self.exec_command(opcode);
            }
            [opcode, a2, a1, a0] => {
                self.begin(opcode)?;
                self.exec_erase(opcode, u32::from_be_bytes([0, a2, a1, a0]));
            }
            [opcode, a2, a1, a0, ref data @ ..] => {
                self.begin(opcode)?;
                self.exec_program(opcode, u32::from_be_bytes([0, a2, a1, a0]), data);
            }
            // Two- and three-byte writes carry no W25Q command we model.
            _ => return Err(SimError::Unsupported),
        }
        Ok(())
    }

    fn spi_read(&mut self, tx: &[u8], buf: &mut [u8]) -> Result<(), SimError> {
        match *tx {
            [opcode] => {
                self.begin(opcode)?;
                self.exec_receive(opcode, buf);
            }
            [opcode, a2, a1, a0] | [opcode, a2, a1, a0, _] => {
                self.begin(opcode)?;
                self.exec_read(opcode, u32::from_be_bytes([0, a2, a1, a0]), buf);
            }
            _ => return Err(SimError::Unsupported),
        }
        Ok(())
    }
}

impl BusTransport for SimulatedW25q {
    type Error = SimError;

    async fn send_command(&mut self, opcode: u8) -> Result<(), SimError> {
        self.begin(opcode)?;
        self.exec_command(opcode);
        Ok(())
    }

    async fn send_command_address(&mut self, opcode: u8, addr: u32) -> Result<(), SimError> {
        self.begin(opcode)?;
        self.exec_erase(opcode, addr);
        Ok(())
    }

    async fn send_command_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), SimError> {
        self.begin(opcode)?;
        if opcode == cmd::WRITE_STATUS_REGISTER {
            self.exec_write_status(data);
        }
        Ok(())
    }

    async fn send_command_address_data(
        &mut self,
        opcode: u8,
        addr: u32,
        data: &[u8],
    ) -> Result<(), SimError> {
        self.begin(opcode)?;
        self.exec_program(opcode, addr, data);
        Ok(())
    }

    async fn receive_after_command(&mut self, opcode: u8, buf: &mut [u8]) -> Result<(), SimError> {
        self.begin(opcode)?;
        self.exec_receive(opcode, buf);
        Ok(())
    }

    async fn receive_after_command_address(
        &mut self,
        opcode: u8,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<(), SimError> {
        self.begin(opcode)?;
        self.exec_read(opcode, addr, buf);
        Ok(())
    }
}

impl ErrorType for SimulatedW25q {
    type Error = SimError;
}

impl SpiDevice for SimulatedW25q {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        let mut tx = Vec::new();
        let mut received = false;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(data) => tx.extend_from_slice(data),
                Operation::Read(buf) => {
                    self.spi_read(&tx, buf)?;
                    received = true;
                }
                Operation::DelayNs(_) => {}
                Operation::Transfer(..) | Operation::TransferInPlace(_) => {
                    return Err(SimError::Unsupported);
                }
            }
        }
        if received {
            Ok(())
        } else {
            self.spi_write(&tx)
        }
    }
}

impl WideSpi for SimulatedW25q {
    type Error = SimError;

    async fn command(&mut self, command: &WideCommand) -> Result<(), SimError> {
        self.wide_log.push(*command);
        self.begin(command.opcode)?;
        match command.address {
            Some(addr) => self.exec_erase(command.opcode, addr),
            None => self.exec_command(command.opcode),
        }
        Ok(())
    }

    async fn send(&mut self, command: &WideCommand, data: &[u8]) -> Result<(), SimError> {
        self.wide_log.push(*command);
        self.begin(command.opcode)?;
        match command.address {
            Some(addr) => self.exec_program(command.opcode, addr, data),
            None if command.opcode == cmd::WRITE_STATUS_REGISTER => self.exec_write_status(data),
            None => return Err(SimError::Unsupported),
        }
        Ok(())
    }

    async fn receive(&mut self, command: &WideCommand, buf: &mut [u8]) -> Result<(), SimError> {
        self.wide_log.push(*command);
        self.begin(command.opcode)?;
        if matches!(command.opcode, cmd::FAST_READ_DUAL_IO | cmd::FAST_READ_QUAD_IO) {
            // Undriven mode bits, or M5-4 = 0b10 (continuous read), would
            // swallow the next opcode.
            match command.alternate {
                Some(mode) if mode & 0x30 != 0x20 => {}
                _ => return Err(SimError::Unsupported),
            }
        }
        match command.address {
            Some(addr) => self.exec_read(command.opcode, addr, buf),
            None => self.exec_receive(command.opcode, buf),
        }
        Ok(())
    }
}

/// Delay provider that returns immediately and accounts the requested time.
#[derive(Debug, Clone, Default)]
pub struct InstantDelay {
    elapsed_ns: u64,
    calls: usize,
}

impl InstantDelay {
    /// Total requested delay in microseconds.
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns / 1_000
    }

    /// Total requested delay in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }

    /// Number of delay requests.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DelayNs for InstantDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += u64::from(ns);
        self.calls += 1;
    }

    async fn delay_us(&mut self, us: u32) {
        self.elapsed_ns += u64::from(us) * 1_000;
        self.calls += 1;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ns += u64::from(ms) * 1_000_000;
        self.calls += 1;
    }
}
