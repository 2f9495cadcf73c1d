//! Disk behaviour against the simulated W25Q: write cycle ordering,
//! failure accounting and result codes.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use flash_disk::{DiskConfig, DiskError, DiskResult, DiskStatus, FlashDisk, IoctlCommand};
use snor::mocks::{InstantDelay, SimulatedW25q};
use snor::w25q::cmd;
use snor::{BusTransport, DriverConfig, SnorDriver};

const SECTOR: usize = 4096;

async fn disk_on(sim: SimulatedW25q) -> FlashDisk<SimulatedW25q, InstantDelay> {
    let mut flash = SnorDriver::new(sim, InstantDelay::default(), DriverConfig::low_latency());
    flash.init().await.unwrap();
    FlashDisk::new(flash, DiskConfig::default()).unwrap()
}

/// Collapse the opcode log into erase / verify-read / program runs.
fn phases(log: &[u8]) -> Vec<char> {
    let mut out: Vec<char> = Vec::new();
    for &op in log {
        let phase = match op {
            cmd::SECTOR_ERASE_4KB => 'E',
            cmd::READ => 'V',
            cmd::PAGE_PROGRAM => 'P',
            _ => continue,
        };
        if out.last() != Some(&phase) || phase == 'E' {
            out.push(phase);
        }
    }
    out
}

#[tokio::test]
async fn each_sector_is_erased_verified_then_programmed_in_order() {
    let mut disk = disk_on(SimulatedW25q::w25q80()).await;
    disk.flash_mut().transport_mut().clear_log();

    let data = vec![0x3Cu8; 4 * SECTOR];
    assert_eq!(disk.write(10, &data).await, Ok(4));

    let sim = disk.flash().transport();
    assert_eq!(phases(sim.opcode_log()), "EVPEVPEVPEVP".chars().collect::<Vec<_>>());
    assert_eq!(sim.erases(), 4);
    assert_eq!(sim.page_programs(), 4 * SECTOR / 256);
    assert!(sim.memory()[10 * SECTOR..14 * SECTOR].iter().all(|&b| b == 0x3C));
}

#[tokio::test]
async fn verify_failure_in_third_sector_reports_two_completed() {
    let mut sim = SimulatedW25q::w25q80();
    sim.memory_mut().fill(0x00);
    // Third sector of the run (flash sector 22) has a cell that will not erase.
    sim.stick_byte((22 * SECTOR + 1234) as u32, 0xEF);
    let mut disk = disk_on(sim).await;

    let data = vec![0x77u8; 4 * SECTOR];
    let err = disk.write(20, &data).await.unwrap_err();
    assert_eq!(err, DiskError::Error { completed: 2 });
    assert_eq!(DiskResult::of::<u32>(&Err(err)), DiskResult::Error);

    let mem = disk.flash().transport().memory();
    assert!(mem[20 * SECTOR..22 * SECTOR].iter().all(|&b| b == 0x77));
    assert!(mem[23 * SECTOR..24 * SECTOR].iter().all(|&b| b == 0x00), "untouched");
}

#[tokio::test]
async fn program_failure_mid_run_reports_completed_sectors() {
    let mut sim = SimulatedW25q::w25q80();
    // Let two full sectors (16 pages each) through, then fail.
    sim.fail_opcode_after(cmd::PAGE_PROGRAM, 2 * SECTOR / 256 + 3);
    let mut disk = disk_on(sim).await;

    let data = vec![0x10u8; 3 * SECTOR];
    assert_eq!(
        disk.write(0, &data).await,
        Err(DiskError::Error { completed: 2 })
    );
    // The driver is usable again straight away.
    assert_eq!(disk.write(2, &data[..SECTOR]).await, Ok(1));
}

#[tokio::test]
async fn read_failure_reports_sectors_already_read() {
    let mut sim = SimulatedW25q::w25q80();
    sim.fail_opcode_after(cmd::READ, 1);
    let mut disk = disk_on(sim).await;

    let mut buf = vec![0u8; 3 * SECTOR];
    assert_eq!(
        disk.read(0, &mut buf).await,
        Err(DiskError::Error { completed: 1 })
    );
}

#[tokio::test]
async fn erase_timeout_leaves_disk_not_ready_until_reinit() {
    let mut flash: SnorDriver<SimulatedW25q, InstantDelay> = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig {
            erase_timeout_ms: 5,
            ..DriverConfig::low_latency()
        },
    );
    flash.init().await.unwrap();
    let mut disk = FlashDisk::new(flash, DiskConfig::default()).unwrap();
    disk.flash_mut().transport_mut().set_erase_busy_polls(50);

    assert_eq!(
        disk.write(0, &[0u8; SECTOR]).await,
        Err(DiskError::Error { completed: 0 })
    );
    assert_eq!(disk.ioctl(IoctlCommand::Sync).await, Err(DiskError::NotReady));

    // Let the simulated erase finish, then recover.
    let mut status = [0u8; 1];
    for _ in 0..50 {
        disk.flash_mut()
            .transport_mut()
            .receive_after_command(cmd::READ_STATUS_REGISTER_1, &mut status)
            .await
            .unwrap();
    }
    disk.flash_mut().init().await.unwrap();
    disk.flash_mut().transport_mut().set_erase_busy_polls(2);
    assert_eq!(disk.status().await, DiskStatus::READY);
    assert_eq!(disk.write(0, &[0u8; SECTOR]).await, Ok(1));
}
