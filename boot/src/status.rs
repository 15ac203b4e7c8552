//! Bootloader status
//!
//! The bootloader moves through a small set of states.  None of them are
//! driven by time; each is entered by an explicit call:
//!
//! +--------------------+-------------------------------------------+
//! | State              | Entered by                                |
//! +--------------------+-------------------------------------------+
//! | Init               | construction                              |
//! | CheckUpdate        | `check_update`                            |
//! | ValidateApp        | `boot`, before checking the active slot   |
//! | UpdateInProgress   | `switch_to_update`, while re-validating   |
//! | JumpToApp          | `jump_to_app` (terminal for a boot)       |
//! | Error              | a failed switch, rollback, jump or boot   |
//! +--------------------+-------------------------------------------+
//!
//! The slot context is separate from the state.  It only ever changes when an
//! operation succeeds, so a failed switch can never leave the active slot
//! pointing at an image that was not validated.

use core::fmt;

use crate::{Error, FirmwareHeader, Version, VERSION_STRING_LEN, FLASH_BASE};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootState {
    Init,
    CheckUpdate,
    ValidateApp,
    JumpToApp,
    UpdateInProgress,
    Error,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootState::Init => "INIT",
            BootState::CheckUpdate => "CHECK_UPDATE",
            BootState::ValidateApp => "VALIDATE_APP",
            BootState::JumpToApp => "JUMP_TO_APP",
            BootState::UpdateInProgress => "UPDATE_IN_PROGRESS",
            BootState::Error => "ERROR",
        })
    }
}

/// Which slots hold what, and the counters that go with them.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BootContext {
    /// Slot the device boots from.  Always one of the two slot addresses.
    pub active_slot: usize,
    /// Slot that receives updates.  Fixed for the life of the bootloader.
    pub update_slot: usize,
    /// Decoded header of the active slot.
    pub active_header: FirmwareHeader,
    /// Header of the update slot, as of the last successful check.
    pub update_header: FirmwareHeader,
    pub boot_count: u32,
    pub update_pending: bool,
    pub rollback_requested: bool,
}

/// Result of a successful update check.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateAvailable {
    /// The update slot holds a valid image newer than the active one.
    Newer(Version),
    /// The update slot is valid but not newer.
    NotNewer,
}

/// Where the application starts.  These are the first two words of the slot,
/// the initial stack pointer and reset vector on a Cortex-M.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AppEntry {
    pub slot: usize,
    pub stack_pointer: u32,
    pub program_counter: u32,
}

/// A snapshot of the bootloader, for printing.
#[derive(Debug, Clone)]
pub struct BootStatus {
    pub state: BootState,
    pub last_error: Option<Error>,
    pub context: BootContext,
}

impl BootStatus {
    pub fn version_string(&self) -> heapless::String<VERSION_STRING_LEN> {
        self.context.active_header.version.label()
    }
}

impl fmt::Display for BootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "YES" } else { "NO" };
        writeln!(f, "Bootloader status")?;
        writeln!(f, "  State:            {}", self.state)?;
        match self.last_error {
            Some(e) => writeln!(f, "  Last Error:       {}", e)?,
            None => writeln!(f, "  Last Error:       none")?,
        }
        writeln!(f, "  Active Slot:      {:#010x}", FLASH_BASE as usize + self.context.active_slot)?;
        writeln!(f, "  Update Slot:      {:#010x}", FLASH_BASE as usize + self.context.update_slot)?;
        writeln!(f, "  Boot Count:       {}", self.context.boot_count)?;
        writeln!(f, "  Update Pending:   {}", yes_no(self.context.update_pending))?;
        writeln!(f, "  Rollback Request: {}", yes_no(self.context.rollback_requested))?;
        writeln!(f, "  Version:          {}", self.version_string())?;
        writeln!(f, "Firmware details:")?;
        write!(f, "{}", self.context.active_header)
    }
}
