//! The update session.

use core::cell::RefCell;

use boot::{Bootloader, FirmwareHeader, HEADER_LEN};
use log::{debug, error, info, warn};
use storage::Flash;

use crate::{
    ChunkInfo, OtaConfig, OtaError, OtaHooks, OtaState, OtaStatus, Result, Statistics,
};

/// Receives a firmware image into the bootloader's update slot.
///
/// The bootloader is shared: the manager only borrows it for the duration of
/// each call, so the application can still ask it for status in between.
pub struct OtaManager<'b, F, H = ()> {
    bootloader: &'b RefCell<Bootloader<F>>,
    config: OtaConfig,
    hooks: H,

    state: OtaState,
    last_error: Option<OtaError>,
    chunk_info: ChunkInfo,
    firmware_header: Option<FirmwareHeader>,
    progress: u8,
    restart_required: bool,
    abort_requested: bool,
    /// Milliseconds since the last accepted chunk.
    idle_ms: u32,

    stats: Statistics,
}

impl<'b, F: Flash> OtaManager<'b, F> {
    pub fn new(bootloader: &'b RefCell<Bootloader<F>>, config: OtaConfig) -> Self {
        OtaManager::with_hooks(bootloader, config, ())
    }
}

impl<'b, F: Flash, H: OtaHooks> OtaManager<'b, F, H> {
    pub fn with_hooks(bootloader: &'b RefCell<Bootloader<F>>, config: OtaConfig, hooks: H) -> Self {
        info!(
            "[OTA_MANAGER] Initialized, max chunk {} bytes, timeout {} ms",
            config.max_chunk_size, config.timeout_ms
        );
        OtaManager {
            bootloader,
            config,
            hooks,
            state: OtaState::Idle,
            last_error: None,
            chunk_info: ChunkInfo::default(),
            firmware_header: None,
            progress: 0,
            restart_required: false,
            abort_requested: false,
            idle_ms: 0,
            stats: Statistics::default(),
        }
    }

    /// Begin a session for an image of `total_size` bytes, to be sent in
    /// chunks of `chunk_size` bytes.  The part of the update slot the image
    /// will occupy is erased before this returns.
    pub fn start_update(&mut self, total_size: u32, chunk_size: u32) -> Result<()> {
        if !matches!(
            self.state,
            OtaState::Idle | OtaState::Complete | OtaState::Error
        ) {
            warn!("[OTA_MANAGER] Cannot start update in state {}", self.state);
            return Err(OtaError::InvalidState);
        }

        if chunk_size == 0 || chunk_size > self.config.max_chunk_size {
            warn!("[OTA_MANAGER] Invalid chunk size: {}", chunk_size);
            return Err(OtaError::InvalidSize);
        }
        let room = {
            let bl = self.bootloader.borrow();
            bl.flash().capacity() - bl.update_slot()
        };
        if total_size == 0 || total_size as usize > room {
            warn!(
                "[OTA_MANAGER] Invalid total size: {} (update slot holds {})",
                total_size, room
            );
            return Err(OtaError::InvalidSize);
        }

        {
            let bl = self.bootloader.borrow();
            if bl.active_slot() == bl.update_slot() {
                warn!(
                    "[OTA_MANAGER] Update slot {:#x} holds the running image, it will be erased",
                    bl.update_slot()
                );
            }
        }

        if self.state != OtaState::Idle {
            self.enter(OtaState::Idle, None)?;
        }
        self.chunk_info = ChunkInfo::new(total_size, chunk_size);
        self.firmware_header = None;
        self.progress = 0;
        self.restart_required = false;
        self.abort_requested = false;
        self.idle_ms = 0;
        self.last_error = None;

        info!(
            "[OTA_MANAGER] Starting update: {} bytes in {} chunks of {}",
            total_size, self.chunk_info.total_chunks, chunk_size
        );

        let erased = {
            let mut bl = self.bootloader.borrow_mut();
            if bl.lock_update_slot().is_err() {
                warn!("[OTA_MANAGER] Update slot is locked");
                return Err(OtaError::InvalidState);
            }
            let erased = bl.erase_update_slot(total_size as usize);
            if erased.is_err() {
                bl.unlock_update_slot();
            }
            erased
        };
        if let Err(e) = erased {
            error!("[OTA_MANAGER] Failed to erase update slot: {}", e);
            self.enter(OtaState::Error, Some(OtaError::FlashError))?;
            return Err(OtaError::FlashError);
        }

        self.stats.total_updates += 1;
        self.enter(OtaState::WaitingForStart, None)?;
        self.set_progress(0);
        Ok(())
    }

    /// Write the next chunk.  Chunks must arrive strictly in order, starting
    /// at zero.
    pub fn receive_chunk(&mut self, chunk_number: u32, data: &[u8]) -> Result<()> {
        if !matches!(
            self.state,
            OtaState::WaitingForStart | OtaState::ReceivingData
        ) {
            warn!("[OTA_MANAGER] Not receiving, state is {}", self.state);
            return Err(OtaError::InvalidState);
        }

        let info = self.chunk_info;
        if chunk_number != info.next_expected_chunk {
            warn!(
                "[OTA_MANAGER] Unexpected chunk {} (expected {})",
                chunk_number, info.next_expected_chunk
            );
            return Err(OtaError::Communication);
        }

        let len = data.len();
        let remaining = (info.total_size - info.received_bytes) as usize;
        if len == 0 || len > info.chunk_size as usize || len > remaining {
            warn!(
                "[OTA_MANAGER] Invalid chunk {} size: {} ({} bytes remaining)",
                chunk_number, len, remaining
            );
            return Err(OtaError::InvalidSize);
        }

        let written = self
            .bootloader
            .borrow_mut()
            .program_update_slot(info.received_bytes as usize, data);
        if let Err(e) = written {
            error!("[OTA_MANAGER] Failed to write chunk {}: {}", chunk_number, e);
            return Err(self.fail(OtaError::FlashError));
        }

        if self.state == OtaState::WaitingForStart {
            self.enter(OtaState::ReceivingData, None)?;
        }

        let info = &mut self.chunk_info;
        info.received_chunks += 1;
        info.received_bytes += len as u32;
        info.next_expected_chunk += 1;
        self.idle_ms = 0;
        debug!(
            "[OTA_MANAGER] Received chunk {}/{} ({} bytes)",
            info.received_chunks, info.total_chunks, len
        );

        let percent = info.percent();
        self.set_progress(percent);
        Ok(())
    }

    /// All bytes are in: check the image.
    pub fn finalize_update(&mut self) -> Result<()> {
        if self.state != OtaState::ReceivingData {
            warn!("[OTA_MANAGER] Cannot finalize in state {}", self.state);
            return Err(OtaError::InvalidState);
        }
        let info = self.chunk_info;
        if info.received_bytes != info.total_size {
            warn!(
                "[OTA_MANAGER] Incomplete transfer: {}/{} bytes",
                info.received_bytes, info.total_size
            );
            return Err(OtaError::InvalidSize);
        }

        info!("[OTA_MANAGER] Finalizing update...");
        self.enter(OtaState::Validating, None)?;
        self.set_progress(95);
        self.validate_update()
    }

    /// Check the received image: header shape, declared size against the
    /// transfer, payload CRC, then the application's `on_validate`.
    pub fn validate_update(&mut self) -> Result<()> {
        if self.state != OtaState::Validating {
            return Err(OtaError::InvalidState);
        }

        let header = {
            let mut bl = self.bootloader.borrow_mut();
            let slot = bl.update_slot();
            bl.read_header(slot)
        };
        let header = match header {
            Ok(header) => header,
            Err(e) => {
                error!("[OTA_MANAGER] Cannot read update header: {}", e);
                return Err(self.fail(OtaError::FlashError));
            }
        };
        self.firmware_header = Some(header.clone());

        if !header.is_valid() {
            error!("[OTA_MANAGER] Invalid firmware header");
            return Err(self.fail(OtaError::ValidationFailed));
        }
        let total = self.chunk_info.total_size;
        if total as usize <= HEADER_LEN || header.size != total {
            error!(
                "[OTA_MANAGER] Size mismatch: header says {}, received {}",
                header.size, total
            );
            return Err(self.fail(OtaError::ValidationFailed));
        }

        let calculated = {
            let mut bl = self.bootloader.borrow_mut();
            let slot = bl.update_slot();
            bl.payload_crc(slot, &header)
        };
        match calculated {
            Ok(crc) if crc == header.crc32 => (),
            Ok(crc) => {
                error!(
                    "[OTA_MANAGER] CRC mismatch: calculated={:#010x}, expected={:#010x}",
                    crc, header.crc32
                );
                return Err(self.fail(OtaError::CrcMismatch));
            }
            Err(e) => {
                error!("[OTA_MANAGER] Cannot read update payload: {}", e);
                return Err(self.fail(OtaError::FlashError));
            }
        }

        if !self.hooks.on_validate(&header) {
            error!("[OTA_MANAGER] Firmware rejected by application");
            return Err(self.fail(OtaError::ValidationFailed));
        }

        info!(
            "[OTA_MANAGER] Firmware validated: v{} ({}), {} bytes",
            header.version,
            header.version_str(),
            header.size
        );
        self.enter(OtaState::Complete, None)?;
        self.set_progress(100);
        self.stats.successful_updates += 1;
        self.restart_required = true;
        Ok(())
    }

    /// Give up on the current session.  What was already written stays in
    /// flash until the next `start_update` erases it.
    pub fn abort_update(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            warn!("[OTA_MANAGER] Nothing to abort in state {}", self.state);
            return Err(OtaError::InvalidState);
        }
        warn!("[OTA_MANAGER] Update aborted");
        self.abort_requested = true;
        self.fail(OtaError::Communication);
        Ok(())
    }

    /// Make the validated image the bootloader's active image.  It runs after
    /// the next restart.
    pub fn apply_update(&mut self) -> Result<()> {
        if self.state != OtaState::Complete {
            warn!("[OTA_MANAGER] No validated update to apply (state {})", self.state);
            return Err(OtaError::InvalidState);
        }

        info!("[OTA_MANAGER] Applying update...");
        self.enter(OtaState::Updating, None)?;

        let switched = {
            let mut bl = self.bootloader.borrow_mut();
            bl.check_update().and_then(|_| bl.switch_to_update())
        };
        if let Err(e) = switched {
            error!("[OTA_MANAGER] Bootloader refused the update: {}", e);
            let e = OtaError::from(e);
            self.enter(OtaState::Error, Some(e))?;
            return Err(e);
        }

        self.restart_required = true;
        self.enter(OtaState::Complete, None)?;
        info!("[OTA_MANAGER] Update applied, restart required");
        Ok(())
    }

    /// Account for `elapsed_ms` of inactivity.  Once a session in flight has
    /// been idle longer than the configured timeout this returns `Timeout`;
    /// what to do about it is up to the caller.
    pub fn poll_timeout(&mut self, elapsed_ms: u32) -> Result<()> {
        if !self.state.is_busy() {
            self.idle_ms = 0;
            return Ok(());
        }
        self.idle_ms = self.idle_ms.saturating_add(elapsed_ms);
        if self.idle_ms > self.config.timeout_ms {
            warn!(
                "[OTA_MANAGER] No data for {} ms in state {}",
                self.idle_ms, self.state
            );
            return Err(OtaError::Timeout);
        }
        Ok(())
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn last_error(&self) -> Option<OtaError> {
        self.last_error
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress
    }

    /// A validated image is waiting for a restart.
    pub fn is_update_available(&self) -> bool {
        self.state == OtaState::Complete && self.restart_required
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    pub fn chunk_info(&self) -> &ChunkInfo {
        &self.chunk_info
    }

    /// Header of the last image that got as far as validation.
    pub fn firmware_header(&self) -> Option<&FirmwareHeader> {
        self.firmware_header.as_ref()
    }

    pub fn restart_required(&self) -> bool {
        self.restart_required
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    pub fn status(&self) -> OtaStatus {
        OtaStatus {
            state: self.state,
            last_error: self.last_error,
            progress_percent: self.progress,
            chunk_info: self.chunk_info,
            restart_required: self.restart_required,
            abort_requested: self.abort_requested,
        }
    }

    /// Move to `next`.  Leaving a session releases the update slot.
    fn enter(&mut self, next: OtaState, error: Option<OtaError>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            error!("[OTA_MANAGER] Illegal transition {} -> {}", self.state, next);
            return Err(OtaError::InvalidState);
        }
        debug!("[OTA_MANAGER] {} -> {}", self.state, next);
        let leaving = self.state.is_busy() && !next.is_busy();
        self.state = next;
        if error.is_some() {
            self.last_error = error;
        }
        if leaving {
            self.bootloader.borrow_mut().unlock_update_slot();
        }
        self.hooks.on_status(next, error);
        Ok(())
    }

    /// End the session with `e`, counting it as a failed update.
    fn fail(&mut self, e: OtaError) -> OtaError {
        self.stats.failed_updates += 1;
        // Every busy state may go to Error.
        let _ = self.enter(OtaState::Error, Some(e));
        e
    }

    fn set_progress(&mut self, percent: u8) {
        self.progress = percent;
        self.hooks.on_progress(percent);
    }
}

/// A manager dropped in the middle of a session gives the update slot back.
impl<F, H> Drop for OtaManager<'_, F, H> {
    fn drop(&mut self) {
        if !self.state.is_busy() {
            return;
        }
        if let Ok(mut bl) = self.bootloader.try_borrow_mut() {
            warn!("[OTA_MANAGER] Dropped in state {}, releasing update slot", self.state);
            bl.unlock_update_slot();
        }
    }
}
