//! Event types for lanlockd -> client streaming
//!
//! Delivery is at-most-once and best-effort: no acknowledgment, no replay of
//! missed events. Clients re-fetch authoritative state on (re)connect.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use lanlock_util::StudentId;

use crate::{RosterSnapshot, SessionRecord, ViolationKind, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: lanlock_util::now(),
            payload,
        }
    }
}

/// All possible events from the coordinator to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The session record changed (broadcast to every connected client, so
    /// waiting exam screens advance without polling)
    SessionChanged(SessionRecord),

    /// Roster or liveness changed (proctor audience only)
    RosterUpdate(RosterSnapshot),

    /// A violation was logged (proctor audience only)
    ViolationAlert {
        student_id: StudentId,
        kind: ViolationKind,
        details: Option<String>,
        timestamp: DateTime<Local>,
    },

    /// A student asked to leave mid-exam (proctor audience only)
    ExitRequested {
        student_id: StudentId,
        student_name: String,
        reason: String,
        requested_at: DateTime<Local>,
    },

    /// A proctor ruled on an exit request (that student's channel only)
    ExitDecision {
        student_id: StudentId,
        approved: bool,
    },

    /// The coordinator is shutting down
    Shutdown,
}
