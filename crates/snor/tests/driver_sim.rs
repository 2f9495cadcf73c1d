//! End-to-end driver behaviour against the simulated W25Q, over every transport.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use snor::mocks::{InstantDelay, SimError, SimulatedW25q};
use snor::w25q::{self, cmd};
use snor::{
    BusWidth, DeviceState, DriverConfig, EraseStatus, FailureCause, FlashError, LineMode,
    QuadConfig, QuadTransport, SnorDriver, SpiTransport,
};

#[tokio::test]
async fn spi_transport_full_cycle() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        SpiTransport::new(SimulatedW25q::w25q80()),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    let desc = flash.init().await.unwrap();
    assert_eq!(desc.size, 1024 * 1024);

    flash.program(0x1F0, b"spanning two pages").await.unwrap();
    let mut buf = [0u8; 18];
    flash.read(0x1F0, &mut buf).await.unwrap();
    assert_eq!(&buf, b"spanning two pages");

    flash.start_erase_sector(0).await.unwrap();
    flash.wait_erase().await.unwrap();
    flash.verify_erase(0).await.unwrap();

    let (transport, _) = flash.release();
    let sim = transport.release();
    assert!(sim.memory()[..4096].iter().all(|&b| b == 0xFF));
}

#[tokio::test]
async fn quad_transport_uses_wide_read_and_program() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        QuadTransport::new(SimulatedW25q::w25q128(), QuadConfig::w25q_quad()),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    flash.program(0x40, &[0x12, 0x34]).await.unwrap();
    let mut buf = [0u8; 2];
    flash.read(0x40, &mut buf).await.unwrap();
    assert_eq!(buf, [0x12, 0x34]);

    let (transport, _) = flash.release();
    let sim = transport.release();
    let log = sim.wide_log();

    let program = log.iter().find(|c| c.opcode == cmd::QUAD_PAGE_PROGRAM).unwrap();
    assert_eq!(program.data_lines, LineMode::Quad);

    let read = log.iter().find(|c| c.opcode == cmd::FAST_READ_QUAD_IO).unwrap();
    assert_eq!(read.address_lines, LineMode::Quad);
    assert_eq!(read.alternate, Some(w25q::READ_MODE_BITS));
    assert_eq!(read.dummy_cycles, 4);

    let status = log
        .iter()
        .find(|c| c.opcode == cmd::READ_STATUS_REGISTER_1)
        .unwrap();
    assert_eq!(status.data_lines, LineMode::Single);
}

#[tokio::test]
async fn quad_init_sets_qe_on_a_factory_fresh_part() {
    let sim = SimulatedW25q::w25q128();
    assert!(!sim.quad_enabled());
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        QuadTransport::new(sim, QuadConfig::w25q_quad()),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    flash.program(0, &[0xA5; 4]).await.unwrap();

    let sim = flash.release().0.release();
    assert!(sim.quad_enabled());
    assert_eq!(&sim.memory()[..4], &[0xA5; 4], "quad program took effect");
    let write = sim
        .wide_log()
        .iter()
        .find(|c| c.opcode == cmd::WRITE_STATUS_REGISTER)
        .unwrap();
    assert_eq!(write.address, None);
}

#[tokio::test]
async fn quad_init_leaves_an_enabled_part_alone() {
    let mut sim = SimulatedW25q::w25q128();
    sim.set_quad_enable(true);
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        QuadTransport::new(sim, QuadConfig::w25q_quad()),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    let sim = flash.release().0.release();
    assert!(sim.opcode_log().contains(&cmd::READ_STATUS_REGISTER_2));
    assert!(!sim.opcode_log().contains(&cmd::WRITE_STATUS_REGISTER));
}

#[tokio::test]
async fn quad_init_fails_when_status_register_is_locked() {
    let mut sim = SimulatedW25q::w25q128();
    sim.set_status_locked(true);
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        QuadTransport::new(sim, QuadConfig::w25q_quad()),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    assert_eq!(flash.init().await, Err(FlashError::QuadEnableFailed));
    assert_eq!(flash.state(), DeviceState::NotReady);
    assert_eq!(flash.descriptor().sector_count, 0);
    assert_eq!(
        flash.release_power_down().await,
        Err(FlashError::Busy(DeviceState::NotReady))
    );
    let mut buf = [0u8; 1];
    assert_eq!(
        flash.read(0, &mut buf).await,
        Err(FlashError::Busy(DeviceState::NotReady))
    );
}

#[tokio::test]
async fn spi_init_never_touches_qe() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    assert!(!flash.transport().quad_enabled());
    assert!(!flash.transport().opcode_log().contains(&cmd::READ_STATUS_REGISTER_2));
}

#[tokio::test]
async fn dual_transport_programs_on_one_line() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        QuadTransport::new(
            SimulatedW25q::w25q80(),
            QuadConfig::new(BusWidth::Dual, 4).unwrap(),
        ),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    flash.program(0, &[0x00]).await.unwrap();
    let sim = flash.release().0.release();
    assert!(sim.opcode_log().contains(&cmd::PAGE_PROGRAM));
    assert!(!sim.opcode_log().contains(&cmd::QUAD_PAGE_PROGRAM));
}

#[tokio::test]
async fn embassy_time_delay_drives_status_polling() {
    let mut sim = SimulatedW25q::w25q80();
    sim.set_program_busy_polls(3);
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        sim,
        embassy_time::Delay,
        DriverConfig {
            poll_interval_us: 100,
            ..DriverConfig::default()
        },
    );
    flash.init().await.unwrap();
    flash.program(0x10, &[0x5A; 8]).await.unwrap();
    let mut buf = [0u8; 8];
    flash.read(0x10, &mut buf).await.unwrap();
    assert_eq!(buf, [0x5A; 8]);
}

#[tokio::test]
async fn transport_failure_during_read_returns_to_ready() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    flash.transport_mut().fail_opcode_after(cmd::READ, 0);
    let mut buf = [0u8; 4];
    assert_eq!(
        flash.read(0, &mut buf).await,
        Err(FlashError::Transport(SimError::Injected))
    );
    assert_eq!(flash.state(), DeviceState::Ready);
    flash.read(0, &mut buf).await.unwrap();
}

#[tokio::test]
async fn transport_failure_while_querying_erase_returns_to_ready() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig::default(),
    );
    flash.init().await.unwrap();
    flash.start_erase_sector(3).await.unwrap();
    flash
        .transport_mut()
        .fail_opcode_after(cmd::READ_STATUS_REGISTER_1, 0);
    assert!(matches!(
        flash.query_erase().await,
        Err(FlashError::Transport(SimError::Injected))
    ));
    assert_eq!(flash.state(), DeviceState::Ready);
}

#[tokio::test]
async fn chip_erase_clears_everything() {
    let mut sim = SimulatedW25q::w25q80();
    sim.memory_mut().fill(0x00);
    let mut flash: SnorDriver<_, _> =
        SnorDriver::new(sim, InstantDelay::default(), DriverConfig::default());
    flash.init().await.unwrap();
    flash.start_erase_all().await.unwrap();
    assert!(matches!(
        flash.query_erase().await.unwrap(),
        EraseStatus::InProgress { .. }
    ));
    flash.wait_erase().await.unwrap();
    let last = flash.descriptor().sector_count - 1;
    flash.verify_erase(0).await.unwrap();
    flash.verify_erase(last).await.unwrap();
}

#[tokio::test]
async fn verify_detects_stuck_byte_after_erase() {
    let mut sim = SimulatedW25q::w25q80();
    sim.stick_byte(0x2FFF, 0xFE);
    let mut flash: SnorDriver<_, _> =
        SnorDriver::new(sim, InstantDelay::default(), DriverConfig::default());
    flash.init().await.unwrap();
    flash.start_erase_sector(2).await.unwrap();
    flash.wait_erase().await.unwrap();
    assert_eq!(
        flash.verify_erase(2).await,
        Err(FlashError::VerifyFailure { offset: 0x2FFF })
    );
}

#[tokio::test]
async fn program_timeout_then_partial_transfer() {
    let mut flash: SnorDriver<_, _> = SnorDriver::new(
        SimulatedW25q::w25q80(),
        InstantDelay::default(),
        DriverConfig {
            max_status_polls: 3,
            ..DriverConfig::low_latency()
        },
    );
    flash.init().await.unwrap();
    // First page completes, then the device hangs.
    flash.transport_mut().set_program_busy_polls(0);
    flash.program(0, &[0u8; 256]).await.unwrap();
    flash.transport_mut().set_stuck_busy(true);
    let err = flash.program(0x100, &[0u8; 10]).await.unwrap_err();
    assert_eq!(err, FlashError::Timeout);

    flash.transport_mut().set_stuck_busy(false);
    flash.init().await.unwrap();
    flash.transport_mut().fail_opcode_after(cmd::READ_STATUS_REGISTER_1, 1);
    let err = flash.program(0x200, &[0u8; 300]).await.unwrap_err();
    assert_eq!(
        err,
        FlashError::PartialTransfer {
            completed: 256,
            cause: FailureCause::Transport
        }
    );
}
