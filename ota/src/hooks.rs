use boot::FirmwareHeader;

use crate::{OtaError, OtaState};

/// Application callbacks.  They run synchronously, inside the manager call
/// that triggers them.
pub trait OtaHooks {
    /// Progress changed, 0 to 100.
    fn on_progress(&mut self, _percent: u8) {}

    /// The session changed state.  `error` is set when the change was caused
    /// by a failure.
    fn on_status(&mut self, _state: OtaState, _error: Option<OtaError>) {}

    /// Last word on a received image, after the header, size and CRC have all
    /// checked out.  Returning false fails the update.
    fn on_validate(&mut self, _header: &FirmwareHeader) -> bool {
        true
    }
}

/// No hooks.
impl OtaHooks for () {}
