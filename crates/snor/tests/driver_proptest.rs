//! Property-based tests for the flash driver.
//! Each case runs against a fresh simulated W25Q80 (1 MB).

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use embassy_futures::block_on;
use proptest::prelude::*;
use snor::mocks::{InstantDelay, SimulatedW25q};
use snor::{DriverConfig, EraseStatus, FlashError, SnorDriver};

type Flash = SnorDriver<SimulatedW25q, InstantDelay>;

fn flash() -> Flash {
    let mut f = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig::low_latency(),
    );
    block_on(f.init()).unwrap();
    f
}

const SIZE: u32 = 1024 * 1024;

proptest! {
    /// Data programmed into erased flash reads back unchanged.
    #[test]
    fn program_then_read_round_trips(
        offset in 0u32..(SIZE - 2048),
        data in proptest::collection::vec(any::<u8>(), 1..1024),
    ) {
        let mut f = flash();
        block_on(f.program(offset, &data)).unwrap();
        let mut back = vec![0u8; data.len()];
        block_on(f.read(offset, &mut back)).unwrap();
        prop_assert_eq!(back, data);
    }

    /// One page-program command per page touched, never crossing a boundary.
    #[test]
    fn program_issues_one_command_per_page(
        offset in 0u32..(SIZE - 4096),
        len in 1usize..2048,
    ) {
        let mut f = flash();
        block_on(f.program(offset, &vec![0u8; len])).unwrap();
        let first_page = offset / 256;
        let last_page = (offset + len as u32 - 1) / 256;
        prop_assert_eq!(
            f.transport().page_programs(),
            (last_page - first_page + 1) as usize
        );
        // Page wrap-around in the device would have clobbered the page start.
        let page_start = (first_page * 256) as usize;
        if (offset as usize) > page_start {
            prop_assert_eq!(f.transport().memory()[page_start], 0xFF);
        }
    }

    /// Accesses that run past the end of the device are rejected.
    #[test]
    fn out_of_bounds_is_rejected(offset in (SIZE - 64)..=SIZE, len in 65usize..512) {
        let mut f = flash();
        let mut buf = vec![0u8; len];
        prop_assert_eq!(block_on(f.read(offset, &mut buf)), Err(FlashError::OutOfBounds));
        prop_assert_eq!(block_on(f.program(offset, &buf)), Err(FlashError::OutOfBounds));
    }

    /// verify_erase pinpoints a planted non-erased byte anywhere in the sector.
    #[test]
    fn verify_reports_first_non_erased_byte(
        sector in 0u32..256,
        pos in 0u32..4096,
        value in 0u8..0xFF,
    ) {
        let mut f = flash();
        let target = sector * 4096 + pos;
        f.transport_mut().memory_mut()[target as usize] = value;
        prop_assert_eq!(
            block_on(f.verify_erase(sector)),
            Err(FlashError::VerifyFailure { offset: target })
        );
    }

    /// query_erase keeps reporting progress for exactly as long as BUSY is set.
    #[test]
    fn erase_is_never_done_while_busy(polls in 0u32..20, sector in 0u32..256) {
        let mut f = flash();
        f.transport_mut().set_erase_busy_polls(polls);
        block_on(f.start_erase_sector(sector)).unwrap();
        for _ in 0..polls {
            let in_progress = matches!(
                block_on(f.query_erase()).unwrap(),
                EraseStatus::InProgress { retry_after_ms } if retry_after_ms > 0
            );
            prop_assert!(in_progress);
        }
        prop_assert_eq!(block_on(f.query_erase()).unwrap(), EraseStatus::Done);
    }
}
