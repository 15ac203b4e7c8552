//! The A/B bootloader.

use log::{debug, error, info, warn};
use storage::{Flash, ReadFlash, ERASED_BYTE};

use crate::{
    crc::crc32_flash, AppEntry, BootContext, BootState, BootStatus, Error, FirmwareHeader,
    Result, SlotLayout, UpdateAvailable, HEADER_LEN, VERSION_STRING_LEN,
};

/// The bootloader owns the flash.  Everything else, including the OTA
/// manager, reaches the flash through it.
pub struct Bootloader<F> {
    flash: F,
    layout: SlotLayout,
    state: BootState,
    last_error: Option<Error>,
    context: BootContext,
    /// Held while an update is being written into the update slot.
    update_locked: bool,
}

/// The update slot lock.  Held while an update is being written; while it
/// is held the bootloader will neither check nor switch to the update slot.
impl<F> Bootloader<F> {
    pub fn lock_update_slot(&mut self) -> Result<()> {
        if self.update_locked {
            return Err(Error::UpdateInProgress);
        }
        self.update_locked = true;
        Ok(())
    }

    pub fn unlock_update_slot(&mut self) {
        self.update_locked = false;
    }

    pub fn is_update_locked(&self) -> bool {
        self.update_locked
    }
}

impl<F: Flash> Bootloader<F> {
    /// Start the bootloader over whatever the flash holds.  Slot A is active.
    pub fn new(mut flash: F, layout: SlotLayout) -> Result<Bootloader<F>> {
        layout.check(&flash)?;

        let active_header = read_header(&mut flash, layout.slot_a)?;
        let update_header = read_header(&mut flash, layout.slot_b)?;

        info!("[BOOTLOADER] Initialized");
        info!("[BOOTLOADER] Active slot: {:#010x}", SlotLayout::mapped(layout.slot_a));
        info!("[BOOTLOADER] Update slot: {:#010x}", SlotLayout::mapped(layout.slot_b));

        Ok(Bootloader {
            flash,
            layout,
            state: BootState::Init,
            last_error: None,
            context: BootContext {
                active_slot: layout.slot_a,
                update_slot: layout.slot_b,
                active_header,
                update_header,
                boot_count: 1,
                update_pending: false,
                rollback_requested: false,
            },
            update_locked: false,
        })
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Direct access to the flash.  Writing through this bypasses the update
    /// slot lock.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn context(&self) -> &BootContext {
        &self.context
    }

    pub fn active_slot(&self) -> usize {
        self.context.active_slot
    }

    pub fn update_slot(&self) -> usize {
        self.context.update_slot
    }

    /// "vX.Y.Z" of the active image.
    pub fn version_string(&self) -> heapless::String<VERSION_STRING_LEN> {
        self.context.active_header.version.label()
    }

    pub fn status(&self) -> BootStatus {
        BootStatus {
            state: self.state,
            last_error: self.last_error,
            context: self.context.clone(),
        }
    }

    /// Decode the header at the start of a slot.
    pub fn read_header(&mut self, slot: usize) -> Result<FirmwareHeader> {
        read_header(&mut self.flash, slot)
    }

    /// CRC32 over the payload that `header` describes.
    pub fn payload_crc(&mut self, slot: usize, header: &FirmwareHeader) -> Result<u32> {
        let len = header.payload_len();
        let end = slot
            .checked_add(HEADER_LEN)
            .and_then(|start| start.checked_add(len))
            .ok_or(Error::InvalidSize)?;
        if end > self.flash.capacity() {
            return Err(Error::InvalidSize);
        }
        Ok(crc32_flash(&mut self.flash, slot + HEADER_LEN, len)?)
    }

    /// Check the image in a slot: magic, then size, then CRC, stopping at the
    /// first failure.  Returns the header on success.
    pub fn validate_firmware(&mut self, slot: usize) -> Result<FirmwareHeader> {
        let capacity = self.flash.capacity();
        if slot.checked_add(HEADER_LEN).map_or(true, |end| end > capacity) {
            return Err(Error::InvalidSize);
        }
        let header = self.read_header(slot)?;

        if header.magic != crate::FIRMWARE_MAGIC {
            warn!(
                "[BOOTLOADER] Invalid magic at {:#x}: {:#010x} (expected: {:#010x})",
                slot,
                header.magic,
                crate::FIRMWARE_MAGIC
            );
            return Err(Error::MagicMismatch);
        }

        let size = header.size as usize;
        if size <= HEADER_LEN || size > capacity - slot {
            warn!("[BOOTLOADER] Invalid size at {:#x}: {}", slot, header.size);
            return Err(Error::InvalidSize);
        }

        let calculated = self.payload_crc(slot, &header)?;
        if calculated != header.crc32 {
            warn!(
                "[BOOTLOADER] CRC mismatch at {:#x}: calculated={:#010x}, stored={:#010x}",
                slot, calculated, header.crc32
            );
            return Err(Error::CrcMismatch);
        }

        debug!(
            "[BOOTLOADER] Firmware at {:#x} is valid: v{} ({}), {} bytes, crc {:#010x}, entry {:#010x}",
            slot,
            header.version,
            header.version_str(),
            header.size,
            header.crc32,
            header.entry_point
        );
        Ok(header)
    }

    /// Look for a valid, newer image in the update slot.  Running this twice
    /// over the same flash gives the same answer.
    pub fn check_update(&mut self) -> Result<UpdateAvailable> {
        if self.update_locked {
            warn!("[BOOTLOADER] Update slot is being written, not checking");
            self.last_error = Some(Error::UpdateInProgress);
            return Err(Error::UpdateInProgress);
        }

        info!("[BOOTLOADER] Checking for updates...");
        self.state = BootState::CheckUpdate;

        let header = match self.validate_firmware(self.context.update_slot) {
            Ok(header) => header,
            Err(e) => {
                // Whatever was pending is gone with the image.
                info!("[BOOTLOADER] No valid update found: {}", e);
                self.context.update_pending = false;
                self.last_error = Some(e);
                return Err(e);
            }
        };

        let current = self.context.active_header.version;
        let update = header.version;
        self.context.update_header = header;
        if update > current {
            info!("[BOOTLOADER] Update available: v{} -> v{}", current, update);
            self.context.update_pending = true;
            Ok(UpdateAvailable::Newer(update))
        } else {
            info!("[BOOTLOADER] No newer update available (v{} installed, v{} offered)", current, update);
            self.context.update_pending = false;
            Ok(UpdateAvailable::NotNewer)
        }
    }

    /// Make the update slot the active slot.  The update is validated again
    /// in case the flash changed since it was checked.
    pub fn switch_to_update(&mut self) -> Result<()> {
        if self.update_locked {
            self.last_error = Some(Error::UpdateInProgress);
            return Err(Error::UpdateInProgress);
        }
        if !self.context.update_pending {
            warn!("[BOOTLOADER] No update pending");
            self.last_error = Some(Error::NoApp);
            return Err(Error::NoApp);
        }

        info!("[BOOTLOADER] Switching to update...");
        self.state = BootState::UpdateInProgress;

        let header = match self.validate_firmware(self.context.update_slot) {
            Ok(header) => header,
            Err(e) => {
                error!("[BOOTLOADER] Update validation failed: {}", e);
                return Err(self.fail(e));
            }
        };

        self.context.active_slot = self.context.update_slot;
        self.context.active_header = header.clone();
        self.context.update_header = header;
        self.context.update_pending = false;
        self.context.boot_count += 1;

        info!(
            "[BOOTLOADER] Switched to update, active slot {:#010x}, version {}",
            SlotLayout::mapped(self.context.active_slot),
            self.context.active_header.version_str()
        );
        Ok(())
    }

    /// Go back to slot A, whichever slot is active now.  Slot B is left alone.
    pub fn rollback(&mut self) -> Result<()> {
        info!("[BOOTLOADER] Rolling back to slot A...");

        let header = match self.validate_firmware(self.layout.slot_a) {
            Ok(header) => header,
            Err(e) => {
                error!("[BOOTLOADER] Rollback validation failed: {}", e);
                return Err(self.fail(Error::RollbackFailed));
            }
        };

        self.context.active_slot = self.layout.slot_a;
        self.context.active_header = header;
        self.context.rollback_requested = true;
        self.context.boot_count += 1;

        info!(
            "[BOOTLOADER] Rollback successful, active slot {:#010x}, version {}",
            SlotLayout::mapped(self.context.active_slot),
            self.context.active_header.version_str()
        );
        Ok(())
    }

    /// Hand control to the image at `slot`.  On hardware this does not return;
    /// here the entry words are returned and the state records the jump.
    pub fn jump_to_app(&mut self, slot: usize) -> Result<AppEntry> {
        if slot != self.layout.slot_a && slot != self.layout.slot_b {
            error!("[BOOTLOADER] Invalid application address {:#x}", slot);
            return Err(self.fail(Error::NoApp));
        }

        let entry = AppEntry {
            slot,
            stack_pointer: self.flash.read_word(slot),
            program_counter: self.flash.read_word(slot + 4),
        };
        info!("[BOOTLOADER] Jumping to application at {:#010x}", SlotLayout::mapped(slot));
        info!("[BOOTLOADER] Setting SP = {:#010x}", entry.stack_pointer);
        info!("[BOOTLOADER] Setting PC = {:#010x}", entry.program_counter);

        self.state = BootState::JumpToApp;
        Ok(entry)
    }

    /// The whole boot sequence: take a newer update if there is one, make sure
    /// the active image is good (falling back to slot A if it is not), and
    /// jump to it.
    pub fn boot(&mut self) -> Result<AppEntry> {
        match self.check_update() {
            Ok(UpdateAvailable::Newer(_)) => {
                if let Err(e) = self.switch_to_update() {
                    warn!("[BOOTLOADER] Staying on the current image: {}", e);
                }
            }
            Ok(UpdateAvailable::NotNewer) => (),
            Err(e) => debug!("[BOOTLOADER] No update taken: {}", e),
        }

        self.state = BootState::ValidateApp;
        let active = self.context.active_slot;
        if let Err(e) = self.validate_firmware(active) {
            if active == self.layout.slot_a {
                error!("[BOOTLOADER] Slot A is not bootable: {}", e);
                return Err(self.fail(Error::NoApp));
            }
            warn!("[BOOTLOADER] Active image is not bootable ({}), rolling back", e);
            self.rollback()?;
        }

        self.jump_to_app(self.context.active_slot)
    }

    /// Erase every page of the update slot that `len` bytes from its start
    /// touch.
    pub fn erase_update_slot(&mut self, len: usize) -> Result<()> {
        let start = self.context.update_slot;
        let end = start.checked_add(len).ok_or(Error::InvalidSize)?;
        if len == 0 || end > self.flash.capacity() {
            return Err(Error::InvalidSize);
        }
        let page = self.flash.erase_size();
        let to = storage::page_end(end, page);
        info!("[BOOTLOADER] Erasing update area {:#x}..{:#x}", start, to);
        self.flash.erase(start, to).map_err(Error::FlashErase)?;

        // Anything found there earlier is gone.
        self.context.update_pending = false;
        Ok(())
    }

    /// Program `data` at `offset` into the update slot, a little endian word
    /// at a time.  A short final word is padded with erased bytes, so the
    /// next write may start in the middle of it.
    pub fn program_update_slot(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let capacity = self.flash.capacity();
        let base = self
            .context
            .update_slot
            .checked_add(offset)
            .ok_or(Error::InvalidSize)?;
        if base.checked_add(data.len()).map_or(true, |end| end > capacity) {
            return Err(Error::InvalidSize);
        }

        for (i, chunk) in data.chunks(4).enumerate() {
            let address = base + i * 4;
            let mut word = [ERASED_BYTE; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            let result = if address + 4 <= capacity {
                self.flash.write_word(address, u32::from_le_bytes(word))
            } else {
                // Only the last word of the device can be short.
                self.flash.write(address, chunk)
            };
            result.map_err(|e| {
                error!("[BOOTLOADER] Failed to write flash at {:#x}: {}", address, e);
                Error::FlashWrite(e)
            })?;
        }
        Ok(())
    }

    /// Record a failure that ends the current operation.
    fn fail(&mut self, e: Error) -> Error {
        self.state = BootState::Error;
        self.last_error = Some(e);
        e
    }
}

fn read_header<F: ReadFlash>(flash: &mut F, slot: usize) -> Result<FirmwareHeader> {
    let mut bytes = [0u8; HEADER_LEN];
    flash.read(slot, &mut bytes)?;
    Ok(FirmwareHeader::decode(&bytes))
}
