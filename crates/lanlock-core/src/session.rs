//! Session state machine rules and registration policy
//!
//! The transition table is strict: an out-of-order control command is an
//! error and must leave the stored record untouched.
//!
//! ```text
//! Setup ──open──▶ Lobby ──start──▶ Active ──stop──▶ Ended
//!   ▲                                                 │
//!   └───────────────── reset (from anywhere) ─────────┘
//!                       Ended ──open──▶ Lobby (rerun)
//! ```

use lanlock_api::{SessionRecord, SessionState};
use lanlock_util::StudentId;

use crate::{CoreError, CoreResult};

/// Parameters for opening a lobby
#[derive(Debug, Clone)]
pub struct OpenLobbyParams {
    pub title: String,
    pub rules: String,
    pub exit_code: String,
    /// `None` means open registration
    pub reg_password: Option<String>,
    /// `None` means any identity may register
    pub eligible_ids: Option<Vec<StudentId>>,
}

/// Check that a lobby may be opened from the current state
pub fn check_open_lobby(state: SessionState) -> CoreResult<()> {
    match state {
        SessionState::Setup | SessionState::Ended => Ok(()),
        other => Err(CoreError::InvalidTransition {
            action: "open a lobby",
            state: other,
        }),
    }
}

/// Check that the exam may be started from the current state
pub fn check_start(state: SessionState) -> CoreResult<()> {
    match state {
        SessionState::Lobby => Ok(()),
        other => Err(CoreError::InvalidTransition {
            action: "start the exam",
            state: other,
        }),
    }
}

/// Check that the exam may be stopped from the current state
pub fn check_stop(state: SessionState) -> CoreResult<()> {
    match state {
        SessionState::Active => Ok(()),
        other => Err(CoreError::InvalidTransition {
            action: "stop the exam",
            state: other,
        }),
    }
}

/// Check that a student may register against the current session.
///
/// Registration is open during the lobby and, for late joiners and
/// reconnects, while the exam is running. The eligibility list and password
/// are both opt-in; when absent, anyone may register.
pub fn check_registration(
    session: &SessionRecord,
    id: &StudentId,
    password: Option<&str>,
) -> CoreResult<()> {
    match session.state {
        SessionState::Lobby | SessionState::Active => {}
        other => {
            return Err(CoreError::InvalidTransition {
                action: "register",
                state: other,
            })
        }
    }

    if let Some(eligible) = &session.eligible_ids {
        if !eligible.contains(id) {
            return Err(CoreError::NotEligible(id.clone()));
        }
    }

    if let Some(expected) = &session.reg_password {
        if password != Some(expected.as_str()) {
            return Err(CoreError::BadCredential);
        }
    }

    Ok(())
}
