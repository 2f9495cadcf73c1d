//! Property-based tests for the disk shim.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use embassy_futures::block_on;
use flash_disk::{fat_timestamp, DiskConfig, DiskError, FatDateTime, FlashDisk, TimeSource};
use proptest::prelude::*;
use snor::mocks::{InstantDelay, SimulatedW25q};
use snor::{DriverConfig, SnorDriver};

const SECTOR: usize = 4096;
const SECTORS: u32 = 256;

fn disk() -> FlashDisk<SimulatedW25q, InstantDelay> {
    let mut flash = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig::low_latency(),
    );
    block_on(flash.init()).unwrap();
    FlashDisk::new(flash, DiskConfig::default()).unwrap()
}

struct Rtc(FatDateTime);

impl TimeSource for Rtc {
    fn now(&self) -> Option<FatDateTime> {
        Some(self.0)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever was on the flash before, a write followed by a read returns the new data.
    #[test]
    fn write_then_read_round_trips(
        start in 0u32..(SECTORS - 3),
        count in 1usize..=3,
        fill in any::<u8>(),
        old in any::<u8>(),
    ) {
        let mut d = disk();
        d.flash_mut().transport_mut().memory_mut().fill(old);
        let data: Vec<u8> = (0..count * SECTOR).map(|i| fill ^ (i as u8)).collect();
        prop_assert_eq!(block_on(d.write(start, &data)), Ok(count as u32));
        let mut back = vec![0u8; data.len()];
        prop_assert_eq!(block_on(d.read(start, &mut back)), Ok(count as u32));
        prop_assert_eq!(back, data);
    }

    /// Neighbouring sectors are never touched by a write.
    #[test]
    fn write_leaves_neighbours_alone(start in 1u32..(SECTORS - 1)) {
        let mut d = disk();
        d.flash_mut().transport_mut().memory_mut().fill(0x00);
        block_on(d.write(start, &[0xAA; SECTOR])).unwrap();
        let mem = d.flash().transport().memory();
        let s = start as usize * SECTOR;
        prop_assert_eq!(mem[s - 1], 0x00);
        prop_assert_eq!(mem[s + SECTOR], 0x00);
    }

    /// Any transfer whose length is not a whole number of sectors is refused.
    #[test]
    fn ragged_lengths_are_rejected(len in 1usize..(3 * SECTOR)) {
        prop_assume!(len % SECTOR != 0);
        let mut d = disk();
        let mut buf = vec![0u8; len];
        prop_assert_eq!(block_on(d.read(0, &mut buf)), Err(DiskError::ParameterError));
        prop_assert_eq!(block_on(d.write(0, &buf)), Err(DiskError::ParameterError));
    }

    /// Every valid calendar time survives a pack / unpack cycle (seconds at 2 s resolution).
    #[test]
    fn fat_time_round_trips(
        year in 1980u16..=2107,
        month in 1u8..=12,
        day in 1u8..=31,
        hour in 0u8..24,
        minute in 0u8..60,
        half_second in 0u8..30,
    ) {
        let t = FatDateTime::new(year, month, day, hour, minute, half_second * 2).unwrap();
        prop_assert_eq!(FatDateTime::unpack(fat_timestamp(&Rtc(t))), Some(t));
    }
}
