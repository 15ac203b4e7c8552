//! Firmware image header
//!
//! Every slot begins with a fixed 80 byte header, all fields little endian:
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | magic            |
//! | 4      | 4    | version major    |
//! | 8      | 4    | version minor    |
//! | 12     | 4    | version patch    |
//! | 16     | 16   | version string, NUL padded |
//! | 32     | 4    | build timestamp  |
//! | 36     | 4    | image size, header included |
//! | 40     | 4    | CRC32 of the payload |
//! | 44     | 4    | entry point      |
//! | 48     | 32   | reserved         |
//!
//! The payload follows immediately.  Decoding never fails; whether the result
//! means anything is decided by [`FirmwareHeader::is_valid`] and, for the
//! payload, by the bootloader.

use core::fmt::{self, Write};

use crate::{crc::crc32, Error, Result};

/// The image header contains the following magic value, indicating the
/// interpretation of the rest of the image header.
pub const FIRMWARE_MAGIC: u32 = 0xDEAD_BEEF;

/// Encoded size of [`FirmwareHeader`].
pub const HEADER_LEN: usize = 80;

pub const VERSION_STRING_LEN: usize = 16;
pub const RESERVED_LEN: usize = 32;

mod offsets {
    pub const MAGIC: usize = 0;
    pub const MAJOR: usize = 4;
    pub const MINOR: usize = 8;
    pub const PATCH: usize = 12;
    pub const VERSION_STRING: usize = 16;
    pub const TIMESTAMP: usize = 32;
    pub const SIZE: usize = 36;
    pub const CRC32: usize = 40;
    pub const ENTRY_POINT: usize = 44;
    pub const RESERVED: usize = 48;
}

/// Semantic version of an image.  Ordering is by major, then minor, then
/// patch, which is what decides whether an update is newer.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Version {
        Version { major, minor, patch }
    }

    /// The "vX.Y.Z" label.  Versions whose label does not fit in the header's
    /// version string field are truncated.
    pub fn label(&self) -> heapless::String<VERSION_STRING_LEN> {
        let mut label = heapless::String::new();
        let mut full = heapless::String::<40>::new();
        // Cannot overflow: 40 bytes holds three u32 in decimal plus separators.
        write!(full, "v{}", self).ok();
        for c in full.chars() {
            if label.push(c).is_err() {
                break;
            }
        }
        label
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FirmwareHeader {
    pub magic: u32,
    pub version: Version,
    /// Human readable version, NUL padded.
    pub version_string: [u8; VERSION_STRING_LEN],
    /// Build time, informational.
    pub timestamp: u32,
    /// Total image size including this header.
    pub size: u32,
    /// CRC32 of the `size - HEADER_LEN` payload bytes after the header.
    pub crc32: u32,
    pub entry_point: u32,
    pub reserved: [u8; RESERVED_LEN],
}

impl FirmwareHeader {
    /// Build the header describing `payload`.  The version string is the
    /// version's label.
    pub fn new(version: Version, payload: &[u8], entry_point: u32) -> Result<FirmwareHeader> {
        let size = payload
            .len()
            .checked_add(HEADER_LEN)
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(Error::InvalidSize)?;
        let mut header = FirmwareHeader {
            magic: FIRMWARE_MAGIC,
            version,
            version_string: [0; VERSION_STRING_LEN],
            timestamp: 0,
            size,
            crc32: crc32(payload),
            entry_point,
            reserved: [0; RESERVED_LEN],
        };
        header.set_version_string(&version.label());
        Ok(header)
    }

    /// Replace the version string.  Anything past the field's length is
    /// dropped.
    pub fn set_version_string(&mut self, text: &str) {
        self.version_string = [0; VERSION_STRING_LEN];
        let len = text.len().min(VERSION_STRING_LEN);
        self.version_string[..len].copy_from_slice(&text.as_bytes()[..len]);
    }

    /// The version string up to the first NUL.  Empty if the bytes are not
    /// UTF-8.
    pub fn version_str(&self) -> &str {
        let end = self
            .version_string
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_STRING_LEN);
        core::str::from_utf8(&self.version_string[..end]).unwrap_or("")
    }

    /// Number of payload bytes covered by the CRC.
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_LEN)
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> FirmwareHeader {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut version_string = [0; VERSION_STRING_LEN];
        version_string.copy_from_slice(
            &bytes[offsets::VERSION_STRING..offsets::VERSION_STRING + VERSION_STRING_LEN],
        );
        let mut reserved = [0; RESERVED_LEN];
        reserved.copy_from_slice(&bytes[offsets::RESERVED..offsets::RESERVED + RESERVED_LEN]);

        FirmwareHeader {
            magic: word(offsets::MAGIC),
            version: Version {
                major: word(offsets::MAJOR),
                minor: word(offsets::MINOR),
                patch: word(offsets::PATCH),
            },
            version_string,
            timestamp: word(offsets::TIMESTAMP),
            size: word(offsets::SIZE),
            crc32: word(offsets::CRC32),
            entry_point: word(offsets::ENTRY_POINT),
            reserved,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        let mut put = |at: usize, value: u32| bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        put(offsets::MAGIC, self.magic);
        put(offsets::MAJOR, self.version.major);
        put(offsets::MINOR, self.version.minor);
        put(offsets::PATCH, self.version.patch);
        put(offsets::TIMESTAMP, self.timestamp);
        put(offsets::SIZE, self.size);
        put(offsets::CRC32, self.crc32);
        put(offsets::ENTRY_POINT, self.entry_point);
        bytes[offsets::VERSION_STRING..offsets::VERSION_STRING + VERSION_STRING_LEN]
            .copy_from_slice(&self.version_string);
        bytes[offsets::RESERVED..offsets::RESERVED + RESERVED_LEN].copy_from_slice(&self.reserved);
        bytes
    }

    /// Shape check only: the magic is right, there is a size, and there is
    /// somewhere to jump to.  The CRC and the size against the flash are the
    /// bootloader's business.
    pub fn is_valid(&self) -> bool {
        self.magic == FIRMWARE_MAGIC && self.size > 0 && self.entry_point != 0
    }
}

impl fmt::Display for FirmwareHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Magic:        {:#010x}", self.magic)?;
        writeln!(f, "  Version:      v{}", self.version)?;
        writeln!(f, "  Version Str:  {}", self.version_str())?;
        writeln!(f, "  Timestamp:    {}", self.timestamp)?;
        writeln!(f, "  Size:         {} bytes", self.size)?;
        writeln!(f, "  CRC32:        {:#010x}", self.crc32)?;
        write!(f, "  Entry Point:  {:#010x}", self.entry_point)
    }
}
