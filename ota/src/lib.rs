//! Over-the-air update manager.
//!
//! An update arrives as a declared total size followed by numbered chunks,
//! strictly in order.  Chunks are written straight into the bootloader's
//! update slot.  Once every byte is in, the image is checked (header shape,
//! declared size, payload CRC, and finally the application's own opinion) and
//! can then be handed to the bootloader to become the active slot.
//!
//! ```text
//! start_update -> receive_chunk* -> finalize_update -> apply_update
//! ```
//!
//! Only one session exists at a time.  The manager holds the bootloader's
//! update slot lock from `start_update` until the session ends, so nothing
//! can switch to a half-written image.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod hooks;
mod manager;
mod state;
mod status;

pub use hooks::OtaHooks;
pub use manager::OtaManager;
pub use state::OtaState;
pub use status::{ChunkInfo, OtaStatus, Statistics};

use thiserror::Error;

/// Largest chunk a session may negotiate.
pub const MAX_CHUNK_SIZE: u32 = 1024;

/// Inactivity, in milliseconds, after which `poll_timeout` reports a stalled
/// transfer.
pub const DEFAULT_TIMEOUT_MS: u32 = 30_000;

pub type Result<T> = core::result::Result<T, OtaError>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum OtaError {
    #[error("operation not allowed in the current state")]
    InvalidState,
    #[error("invalid size")]
    InvalidSize,
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("flash error")]
    FlashError,
    #[error("timed out")]
    Timeout,
    #[error("communication error")]
    Communication,
    #[error("validation failed")]
    ValidationFailed,
}

/// Bootloader failures, as seen by an update session.
impl From<boot::Error> for OtaError {
    fn from(e: boot::Error) -> Self {
        match e {
            boot::Error::CrcMismatch => OtaError::CrcMismatch,
            boot::Error::NoApp
            | boot::Error::MagicMismatch
            | boot::Error::InvalidSize
            | boot::Error::RollbackFailed => OtaError::ValidationFailed,
            boot::Error::UpdateInProgress => OtaError::InvalidState,
            boot::Error::FlashWrite(_) | boot::Error::FlashErase(_) | boot::Error::Flash(_) => {
                OtaError::FlashError
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OtaConfig {
    pub max_chunk_size: u32,
    pub timeout_ms: u32,
}

impl Default for OtaConfig {
    fn default() -> Self {
        OtaConfig {
            max_chunk_size: MAX_CHUNK_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}
