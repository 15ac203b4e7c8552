//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  Every style here is large enough to hold the default slot layout
//! (slot A at 16 KiB, slot B at 128 KiB) with both slots page aligned.

use crate::SimFlash;
use crate::Result;

/// The configuration of a single flash device.
#[derive(Debug)]
pub struct AreaLayout {
    pub read_size: usize,
    /// Advisory.  The simulator accepts writes of any length at any offset.
    pub write_size: usize,
    pub erase_size: usize,
    pub sectors: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(
            self.read_size,
            self.write_size,
            self.erase_size,
            self.sectors,
        )
    }

    /// Total size of the device in bytes.
    pub fn capacity(&self) -> usize {
        self.erase_size * self.sectors
    }
}

/// STM32F1-style, and the default device.  1 MiB of 2 KiB pages, programmed
/// a word at a time.
pub static STM32F1: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 4,
    erase_size: 2 * 1024,
    sectors: 512,
};

/// K64-style.
/// These devices have small uniform sectors.
pub static K64: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 8,
    erase_size: 4 * 1024,
    sectors: 256,
};

/// Small part with 1 KiB pages and only 256 KiB total.  Slot B is squeezed to
/// the back half of the device.
pub static SMALL: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 4,
    erase_size: 1024,
    sectors: 256,
};

/// Page-style devices.  Based on the LPC55S69.
pub static LPC: AreaLayout = AreaLayout {
    read_size: 1,
    write_size: 512,
    erase_size: 512,
    sectors: 1024,
};

/// The default device.
pub static DEFAULT: &AreaLayout = &STM32F1;

/// All of the flash devices.
pub static ALL_FLASHES: [&AreaLayout; 4] = [&STM32F1, &K64, &SMALL, &LPC];

/// An iterator that returns a freshly erased device of each style.
pub fn all_flashes() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_FLASHES.iter().map(|style| style.build())
}
