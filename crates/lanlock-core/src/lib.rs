//! Session state machine and proctoring engine for lanlockd
//!
//! This crate is the heart of lanlockd, containing:
//! - The exam session state machine (Setup -> Lobby -> Active -> Ended)
//! - Registration policy (eligibility list, lobby password)
//! - Roster liveness (heartbeats, stale sweep)
//! - The violation log and answer collection

mod engine;
mod events;
mod session;

pub use engine::*;
pub use events::*;
pub use session::*;

use lanlock_api::SessionState;
use lanlock_store::StoreError;
use lanlock_util::StudentId;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("Student '{0}' is not on the eligible list")]
    NotEligible(StudentId),

    #[error("Exam duration of {0} minutes is out of range")]
    InvalidDuration(u64),

    #[error("Registration password mismatch")]
    BadCredential,

    #[error("Student '{0}' is not registered")]
    NotRegistered(StudentId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;
