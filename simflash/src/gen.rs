//! Image generation.
//!
//! Builds complete firmware images, header and payload, with a payload of
//! seeded pseudo-random bytes so that tests are reproducible.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use anyhow::{anyhow, Result};
use boot::{FirmwareHeader, Version, FLASH_BASE, HEADER_LEN};

pub struct GeneratedImage {
    pub header: FirmwareHeader,
    pub data: Vec<u8>,
}

impl GeneratedImage {
    /// Split the image into transfer chunks.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = (u32, &[u8])> {
        self.data
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| (i as u32, chunk))
    }
}

pub struct GenBuilder {
    /// Total size of the image, header included.
    size: usize,
    /// Seed for the PRNG
    seed: usize,
    /// Version
    version: Version,
    /// Overrides the default "vX.Y.Z" version string.
    version_string: Option<String>,
    timestamp: u32,
    entry_point: u32,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 4096,
            seed: 1,
            version: Version::new(1, 0, 0),
            version_string: None,
            timestamp: 0,
            entry_point: FLASH_BASE + 0x4000,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, major: u32, minor: u32, patch: u32) -> &mut Self {
        self.version = Version::new(major, minor, patch);
        self
    }

    pub fn version_string(&mut self, text: &str) -> &mut Self {
        self.version_string = Some(text.to_string());
        self
    }

    pub fn timestamp(&mut self, timestamp: u32) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    pub fn entry_point(&mut self, entry_point: u32) -> &mut Self {
        self.entry_point = entry_point;
        self
    }

    pub fn build(&self) -> Result<GeneratedImage> {
        if self.size <= HEADER_LEN {
            return Err(anyhow!(
                "image size {} leaves no room for a payload after the {} byte header",
                self.size,
                HEADER_LEN
            ));
        }

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut payload = vec![0u8; self.size - HEADER_LEN];
        rng.fill_bytes(&mut payload);

        let mut header = FirmwareHeader::new(self.version, &payload, self.entry_point)
            .map_err(|e| anyhow!("cannot build header: {}", e))?;
        header.timestamp = self.timestamp;
        if let Some(text) = &self.version_string {
            header.set_version_string(text);
        }

        let mut data = Vec::with_capacity(self.size);
        data.extend_from_slice(&header.encode());
        data.extend_from_slice(&payload);

        Ok(GeneratedImage { header, data })
    }
}
