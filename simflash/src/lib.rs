//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differ quite a bit in terms
//! of capabilities provided.  This simulator captures the part that matters to
//! a bootloader: a flat array of bytes that reads back as all-ones when
//! erased, is erased a page at a time, and refuses to program a byte that has
//! not been erased first.
//!
//! The device is made available through the `storage::Flash` traits.  Reads
//! have no alignment requirement.  Writes are checked byte by byte against the
//! erased state rather than against a write size, which lets the OTA code
//! program words at any offset, as long as it never programs over data.
//!
//! A few helpers that real hardware does not have are provided for testing:
//! `install` to factory program an image, `corrupt` to flip bytes behind the
//! bootloader's back, and an erase fault to make erases fail.

use core::fmt;

use storage::{Error, Flash, ReadFlash, ERASED_BYTE};

pub mod gen;
pub mod styles;

type Result<T> = core::result::Result<T, Error>;

/// An in-memory flash device.
pub struct SimFlash {
    data: Vec<u8>,
    read_size: usize,
    /// Reported through `Flash::write_size` only.  `write` does not hold
    /// callers to it.
    write_size: usize,
    erase_size: usize,
    erase_fault: bool,
}

impl SimFlash {
    /// Build a new, fully erased device of `sectors` pages of `erase_size`
    /// bytes.
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        if read_size == 0 || write_size == 0 || erase_size == 0 || sectors == 0 {
            return Err(Error::OutOfRange);
        }
        if erase_size % write_size != 0 || erase_size % read_size != 0 {
            return Err(Error::NotAligned);
        }
        let capacity = erase_size.checked_mul(sectors).ok_or(Error::OutOfRange)?;
        Ok(SimFlash {
            data: vec![ERASED_BYTE; capacity],
            read_size,
            write_size,
            erase_size,
            erase_fault: false,
        })
    }

    /// Program an image at `offset`, erasing the pages it covers first.  This
    /// is what a factory programmer would do.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = offset.checked_add(data.len()).ok_or(Error::OutOfRange)?;
        if end > self.data.len() {
            return Err(Error::OutOfRange);
        }
        let from = storage::page_base(offset, self.erase_size);
        let to = storage::page_end(end, self.erase_size);
        self.erase(from, to)?;
        self.write(offset, data)
    }

    /// Overwrite a byte without regard for the erased state.
    pub fn corrupt(&mut self, offset: usize, value: u8) -> Result<()> {
        let byte = self.data.get_mut(offset).ok_or(Error::OutOfRange)?;
        *byte = value;
        Ok(())
    }

    /// While set, every erase fails.
    pub fn set_erase_fault(&mut self, fault: bool) {
        self.erase_fault = fault;
    }

    /// The raw contents of the device.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// A printable hex dump of a region.
    pub fn dump(&self, offset: usize, len: usize) -> Result<Dump<'_>> {
        if len == 0 {
            return Err(Error::OutOfRange);
        }
        let end = offset.checked_add(len).ok_or(Error::OutOfRange)?;
        let bytes = self.data.get(offset..end).ok_or(Error::OutOfRange)?;
        Ok(Dump { base: offset, bytes })
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        storage::check_erase(self, from, to)?;
        if self.erase_fault {
            log::error!("[FLASH] erase of {:#x}..{:#x} failed", from, to);
            return Err(Error::EraseFailed);
        }
        log::debug!("[FLASH] erasing {:#x}..{:#x}", from, to);
        self.data[from..to].fill(ERASED_BYTE);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        // The write size is not enforced here, NOR programming only cares
        // that the bytes are still erased.
        storage::check_slice(self, 1, offset, bytes.len())?;
        let target = &mut self.data[offset..offset + bytes.len()];
        if let Some(pos) = target.iter().position(|&b| b != ERASED_BYTE) {
            log::warn!(
                "[FLASH] location not erased ({:#04x} at {:#x})",
                target[pos],
                offset + pos
            );
            return Err(Error::NotErased);
        }
        target.copy_from_slice(bytes);
        Ok(())
    }
}

/// A hex dump of a flash region, 16 bytes per line.
pub struct Dump<'a> {
    base: usize,
    bytes: &'a [u8],
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (line, chunk) in self.bytes.chunks(16).enumerate() {
            write!(f, "{:#010x}: ", self.base + line * 16)?;
            for i in 0..16 {
                match chunk.get(i) {
                    Some(b) => write!(f, "{:02x} ", b)?,
                    None => write!(f, "   ")?,
                }
                if i == 7 {
                    write!(f, " ")?;
                }
            }
            write!(f, " ")?;
            for &b in chunk {
                let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
                write!(f, "{}", c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
