//! Disk shared between tasks.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal_async::delay::DelayNs;
use snor::{BusTransport, DEFAULT_COMPARE_BUFFER_SIZE};

use crate::disk::FlashDisk;
use crate::error::DiskError;
use crate::ioctl::{IoctlCommand, IoctlResponse};
use crate::status::DiskStatus;

/// [`FlashDisk`] behind an async mutex.
///
/// Each call holds the lock for the whole multi-sector operation, so a
/// concurrent reader never sees a sector between erase and program.
pub struct SharedDisk<M: RawMutex, T, D, const CMP: usize = DEFAULT_COMPARE_BUFFER_SIZE> {
    disk: Mutex<M, FlashDisk<T, D, CMP>>,
}

impl<M: RawMutex, T, D, const CMP: usize> SharedDisk<M, T, D, CMP> {
    /// Wrap a disk.
    pub const fn new(disk: FlashDisk<T, D, CMP>) -> Self {
        Self {
            disk: Mutex::new(disk),
        }
    }

    /// Exclusive access for a sequence of operations.
    pub async fn lock(&self) -> MutexGuard<'_, M, FlashDisk<T, D, CMP>> {
        self.disk.lock().await
    }

    /// Unwrap the disk.
    pub fn into_inner(self) -> FlashDisk<T, D, CMP> {
        self.disk.into_inner()
    }
}

impl<M, T, D, const CMP: usize> SharedDisk<M, T, D, CMP>
where
    M: RawMutex,
    T: BusTransport,
    D: DelayNs,
{
    /// See [`FlashDisk::status`].
    pub async fn status(&self) -> DiskStatus {
        self.disk.lock().await.status().await
    }

    /// See [`FlashDisk::read`].
    pub async fn read(&self, start: u32, buf: &mut [u8]) -> Result<u32, DiskError> {
        self.disk.lock().await.read(start, buf).await
    }

    /// See [`FlashDisk::write`].
    pub async fn write(&self, start: u32, data: &[u8]) -> Result<u32, DiskError> {
        self.disk.lock().await.write(start, data).await
    }

    /// See [`FlashDisk::ioctl`].
    pub async fn ioctl(&self, command: IoctlCommand) -> Result<IoctlResponse, DiskError> {
        self.disk.lock().await.ioctl(command).await
    }
}
