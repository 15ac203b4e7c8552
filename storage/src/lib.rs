//! Storage types.
//!
//! These traits describe NOR-style flash: reads are unrestricted, erases work
//! on whole pages and set every byte to `0xFF`, and a write may only program
//! bytes that are currently erased.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use thiserror::Error;

/// The value of a single erased byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// The value read back from an erased, or nonexistent, word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum Error {
    #[error("access outside of the flash")]
    OutOfRange,
    #[error("erase range is not page aligned")]
    NotAligned,
    #[error("write to a byte that is not erased")]
    NotErased,
    #[error("page erase failed")]
    EraseFailed,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;

    /// Read a little-endian word.  Reads past the end of the device return the
    /// erased value, as an unprogrammed flash would.
    fn read_word(&mut self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        match self.read(offset, &mut word) {
            Ok(()) => u32::from_le_bytes(word),
            Err(_) => ERASED_WORD,
        }
    }
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).  This is the page size.
    fn erase_size(&self) -> usize;

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Erase the page containing `offset`.
    fn erase_page(&mut self, offset: usize) -> Result<()> {
        if offset >= self.capacity() {
            return Err(Error::OutOfRange);
        }
        let page = page_base(offset, self.erase_size());
        self.erase(page, page + self.erase_size())
    }

    /// Program a single little-endian word.  Every one of the four target
    /// bytes must be erased.
    fn write_word(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// Round `offset` down to the start of its page.
pub fn page_base(offset: usize, erase_size: usize) -> usize {
    offset - offset % erase_size
}

/// Round `offset` up to the next page boundary.
pub fn page_end(offset: usize, erase_size: usize) -> usize {
    offset.div_ceil(erase_size) * erase_size
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfRange);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfRange);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}
