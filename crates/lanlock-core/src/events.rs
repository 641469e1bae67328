//! Core events emitted by the engine

use lanlock_api::{RosterSnapshot, SessionRecord, Violation};

/// Events emitted by the engine alongside a command result. The caller
/// decides which audiences each one reaches.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// The session record changed
    SessionChanged(SessionRecord),

    /// The roster or a liveness flag changed
    RosterChanged(RosterSnapshot),

    /// A violation was appended to the log
    ViolationLogged(Violation),
}
