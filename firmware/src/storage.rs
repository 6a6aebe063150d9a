//! Stores settings in the last page of the internal flash.
use defmt::debug;
use embassy_stm32::flash::{Blocking, Flash};
use tipctl::settings::{Error, RECORD_SIZE, SettingsStorage};

use crate::resources::StorageResources;

/// Offset of the settings page from the start of the flash (last 2 KiB page of 128 KiB).
const PAGE_OFFSET: u32 = 0x1_F800;
/// Size of a flash page.
const PAGE_SIZE: u32 = 0x800;

/// Settings storage in flash.
pub struct FlashStorage {
    /// The flash peripheral.
    flash: Flash<'static, Blocking>,
}

impl FlashStorage {
    /// Set up settings storage.
    pub fn new(resources: StorageResources) -> Self {
        Self {
            flash: Flash::new_blocking(resources.flash),
        }
    }
}

impl SettingsStorage for FlashStorage {
    async fn read(&mut self, record: &mut [u8; RECORD_SIZE]) -> Result<(), Error> {
        self.flash
            .blocking_read(PAGE_OFFSET, record)
            .map_err(|_| Error::Storage)
    }

    async fn write(&mut self, record: &[u8; RECORD_SIZE]) -> Result<(), Error> {
        debug!("Erasing settings page");
        self.flash
            .blocking_erase(PAGE_OFFSET, PAGE_OFFSET + PAGE_SIZE)
            .map_err(|_| Error::Storage)?;
        self.flash
            .blocking_write(PAGE_OFFSET, record)
            .map_err(|_| Error::Storage)
    }
}
