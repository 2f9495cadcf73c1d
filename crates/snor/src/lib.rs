//! Serial NOR flash driver for Winbond W25Q devices
//!
//! The driver talks to the chip through a [`BusTransport`], a small
//! command-level abstraction with two implementations:
//!
//! ```text
//! SnorDriver ──► BusTransport ──┬─► SpiTransport<D: SpiDevice>   (embedded-hal-async SPI)
//!                               └─► QuadTransport<W: WideSpi>    (QSPI / OCTOSPI controller)
//! ```
//!
//! # Operations
//!
//! - [`SnorDriver::init`] - identify the device and derive its geometry
//! - [`SnorDriver::read`] / [`SnorDriver::program`] - byte-granular access
//! - [`SnorDriver::start_erase_sector`] / [`SnorDriver::start_erase_all`] -
//!   non-blocking erase, completed through [`SnorDriver::query_erase`] or
//!   [`SnorDriver::wait_erase`]
//! - [`SnorDriver::verify_erase`] - check a sector reads back erased
//!
//! The driver also implements the `embedded-storage-async`
//! [`NorFlash`](embedded_storage_async::nor_flash::NorFlash) traits.
//!
//! # Features
//!
//! - `std`: `std::error::Error` impls and the simulated device in [`mocks`]
//! - `defmt`: defmt derives and log output (hardware builds)
//! - `tracing`: log output through `tracing` (host builds)
//!
//! # Example
//!
//! ```no_run
//! use snor::{DriverConfig, SnorDriver, SpiTransport};
//!
//! async fn bring_up<S, D>(spi: S, delay: D)
//! where
//!     S: embedded_hal_async::spi::SpiDevice,
//!     D: embedded_hal_async::delay::DelayNs,
//! {
//!     let mut flash: SnorDriver<_, _> =
//!         SnorDriver::new(SpiTransport::new(spi), delay, DriverConfig::default());
//!     if flash.init().await.is_ok() {
//!         let mut header = [0u8; 16];
//!         let _ = flash.read(0, &mut header).await;
//!     }
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)] // opcodes and register names in doc comments
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)] // buffer lengths are bounded by the 24-bit address space
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[cfg(all(feature = "std", not(test)))]
extern crate std;

#[macro_use]
mod fmt;

pub mod bus;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod mocks;
mod nor_flash;
pub mod w25q;

pub use bus::{
    BusTransport, BusWidth, LineMode, QuadConfig, QuadTransport, SpiTransport, WideCommand,
    WideSpi,
};
pub use config::{DriverConfig, SectorMode, DEFAULT_COMPARE_BUFFER_SIZE};
pub use descriptor::{DeviceId, DeviceState, FlashAttributes, FlashDescriptor};
pub use driver::{EraseStatus, SnorDriver, StatusRegister};
pub use error::{FailureCause, FlashError};
