//! Session states
//!
//! ```text
//! Idle -> WaitingForStart -> ReceivingData -> Validating -> Complete
//! Complete -> Updating -> Complete
//! any busy state -> Error
//! Complete, Error -> Idle (on the next start_update)
//! ```
//!
//! `Complete` and `Error` end a session.

use core::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OtaState {
    Idle,
    WaitingForStart,
    ReceivingData,
    Validating,
    Updating,
    Complete,
    Error,
}

impl OtaState {
    /// Is `next` a legal successor of this state?
    pub fn can_transition_to(self, next: OtaState) -> bool {
        use OtaState::*;
        matches!(
            (self, next),
            (Idle, WaitingForStart)
                | (Idle, Error)
                | (WaitingForStart, ReceivingData)
                | (WaitingForStart, Error)
                | (ReceivingData, Validating)
                | (ReceivingData, Error)
                | (Validating, Complete)
                | (Validating, Error)
                | (Complete, Updating)
                | (Complete, Idle)
                | (Updating, Complete)
                | (Updating, Error)
                | (Error, Idle)
        )
    }

    /// The session is over, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, OtaState::Complete | OtaState::Error)
    }

    /// A session is in flight.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            OtaState::WaitingForStart
                | OtaState::ReceivingData
                | OtaState::Validating
                | OtaState::Updating
        )
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OtaState::Idle => "IDLE",
            OtaState::WaitingForStart => "WAITING_FOR_START",
            OtaState::ReceivingData => "RECEIVING_DATA",
            OtaState::Validating => "VALIDATING",
            OtaState::Updating => "UPDATING",
            OtaState::Complete => "COMPLETE",
            OtaState::Error => "ERROR",
        })
    }
}
