//! This is a basic A/B bootloader built for embedded rust.
//!
//! Two fixed slots hold firmware images, each a [`FirmwareHeader`] followed by
//! its payload.  Slot A is the factory image and the rollback target; slot B
//! receives updates.  Switching between them is a change of which slot is
//! booted, the images themselves are never copied.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod bootloader;
mod crc;
mod image;
mod status;

pub use bootloader::Bootloader;
pub use crc::{crc32, crc32_flash};
pub use image::{FirmwareHeader, Version, FIRMWARE_MAGIC, HEADER_LEN, RESERVED_LEN, VERSION_STRING_LEN};
pub use status::{AppEntry, BootContext, BootState, BootStatus, UpdateAvailable};

use storage::Flash;
use thiserror::Error;

/// Address at which offset 0 of the flash appears in the memory map.  Only
/// used for printing and for entry points.
pub const FLASH_BASE: u32 = 0x0800_0000;

pub type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum Error {
    #[error("no bootable application")]
    NoApp,
    #[error("payload CRC mismatch")]
    CrcMismatch,
    #[error("bad image magic")]
    MagicMismatch,
    #[error("flash write failed: {0}")]
    FlashWrite(storage::Error),
    #[error("flash erase failed: {0}")]
    FlashErase(storage::Error),
    #[error("invalid image size")]
    InvalidSize,
    #[error("an update is being written to the update slot")]
    UpdateInProgress,
    #[error("rollback image is not valid")]
    RollbackFailed,
    #[error("flash error: {0}")]
    Flash(#[from] storage::Error),
}

/// Where the two slots live, as offsets into the flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlotLayout {
    pub slot_a: usize,
    pub slot_b: usize,
}

/// Slot A after a 16 KiB bootloader, slot B at 128 KiB.
pub const DEFAULT_LAYOUT: SlotLayout = SlotLayout {
    slot_a: 0x4000,
    slot_b: 0x2_0000,
};

impl Default for SlotLayout {
    fn default() -> Self {
        DEFAULT_LAYOUT
    }
}

impl SlotLayout {
    /// Make sure both slots are page aligned, ordered, and that each has room
    /// for at least a header.
    pub fn check<F: Flash>(&self, flash: &F) -> Result<()> {
        let page = flash.erase_size();
        if self.slot_a % page != 0 || self.slot_b % page != 0 {
            return Err(Error::InvalidSize);
        }
        if self.slot_a.checked_add(HEADER_LEN).map_or(true, |end| end > self.slot_b) {
            return Err(Error::InvalidSize);
        }
        if self.slot_b.checked_add(HEADER_LEN).map_or(true, |end| end > flash.capacity()) {
            return Err(Error::InvalidSize);
        }
        Ok(())
    }

    /// Memory mapped address of a slot offset.
    pub fn mapped(slot: usize) -> u32 {
        FLASH_BASE.wrapping_add(slot as u32)
    }
}
