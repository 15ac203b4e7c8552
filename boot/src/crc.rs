//! CRC32 used to check firmware payloads.
//!
//! This is the reflected CRC-32 with polynomial 0xEDB88320, initial value and
//! final xor of all ones (as used by zlib and Ethernet).

use crc::{Crc, CRC_32_ISO_HDLC};
use storage::ReadFlash;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// CRC32 of `len` bytes of flash starting at `offset`, read through a small
/// buffer so the slot never needs to be held in RAM.
pub fn crc32_flash<F: ReadFlash>(flash: &mut F, offset: usize, len: usize) -> storage::Result<u32> {
    let mut digest = CRC32.digest();
    let mut buffer = [0u8; 256];
    let mut pos = 0;
    while pos < len {
        let todo = (len - pos).min(buffer.len());
        let buf = &mut buffer[..todo];
        flash.read(offset + pos, buf)?;
        digest.update(buf);
        pos += todo;
    }
    Ok(digest.finalize())
}
