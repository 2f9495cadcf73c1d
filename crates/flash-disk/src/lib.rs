//! FAT block-device shim over serial NOR flash
//!
//! Exposes a [`SnorDriver`](snor::SnorDriver) as a sector-addressed disk
//! following the FatFs `diskio` contract:
//!
//! | diskio            | here                                  |
//! |-------------------|---------------------------------------|
//! | `disk_status`     | [`FlashDisk::status`]                 |
//! | `disk_initialize` | [`FlashDisk::initialize`]             |
//! | `disk_read`       | [`FlashDisk::read`]                   |
//! | `disk_write`      | [`FlashDisk::write`]                  |
//! | `disk_ioctl`      | [`FlashDisk::ioctl`]                  |
//! | `get_fattime`     | [`fat_timestamp`]                     |
//!
//! [`DiskResult`] and [`DiskStatus::bits`] give the C numeric codes.
//! [`SharedDisk`] serialises access from several tasks.
//!
//! # Features
//!
//! - `std`: `std::error::Error` impls
//! - `defmt`: defmt derives and log output (hardware builds)
//! - `tracing`: log output through `tracing` (host builds)

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
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[cfg(all(feature = "std", not(test)))]
extern crate std;

#[macro_use]
mod fmt;

pub mod config;
pub mod disk;
pub mod error;
pub mod ioctl;
pub mod shared;
pub mod status;
pub mod time;

pub use config::DiskConfig;
pub use disk::FlashDisk;
pub use error::DiskError;
pub use ioctl::{IoctlCommand, IoctlResponse};
pub use shared::SharedDisk;
pub use status::{DiskResult, DiskStatus};
pub use time::{fat_timestamp, FatDateTime, NoClock, TimeSource};
