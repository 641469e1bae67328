//! Store trait definitions

use chrono::{DateTime, Local};
use lanlock_api::{
    AnswerPair, AnswerRow, RosterSnapshot, SessionRecord, StudentResults, StudentRow, Violation,
    ViolationKind,
};
use lanlock_util::StudentId;
use std::time::Duration;

use crate::StoreResult;

/// A student registration as received on connect
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub id: StudentId,
    pub name: String,
    pub address: String,
}

/// Main store trait.
///
/// Mutating operations take `now` explicitly so liveness behavior can be
/// exercised in tests without sleeping.
pub trait Store: Send + Sync {
    // Session

    /// Load the singleton session record; a fresh database reads as `Setup`
    fn get_session(&self) -> StoreResult<SessionRecord>;

    /// Persist the singleton session record
    fn save_session(&self, session: &SessionRecord) -> StoreResult<()>;

    // Roster

    /// Insert or refresh a student record. A reconnecting student keeps the
    /// original `connected_at` and `submitted_at`; everything else is
    /// overwritten and the record comes back online.
    fn upsert_student(&self, student: &NewStudent, now: DateTime<Local>) -> StoreResult<()>;

    /// Record a heartbeat. Returns false if the student is unknown.
    fn record_heartbeat(
        &self,
        id: &StudentId,
        focused: bool,
        now: DateTime<Local>,
    ) -> StoreResult<bool>;

    /// Update the focus flag without touching the liveness timestamp
    fn set_focus(&self, id: &StudentId, focused: bool) -> StoreResult<()>;

    /// Mark one student offline (socket closed)
    fn set_offline(&self, id: &StudentId) -> StoreResult<()>;

    /// Mark every online student whose last heartbeat is older than
    /// `timeout` as offline and unfocused. Returns how many flipped.
    fn mark_stale_offline(&self, timeout: Duration, now: DateTime<Local>) -> StoreResult<usize>;

    fn get_student(&self, id: &StudentId) -> StoreResult<Option<StudentRow>>;

    fn get_students(&self) -> StoreResult<Vec<StudentRow>>;

    /// Roster plus aggregate counters, as pushed to proctors
    fn roster(&self) -> StoreResult<RosterSnapshot>;

    /// Stamp a student's exam as turned in
    fn set_submitted(&self, id: &StudentId, now: DateTime<Local>) -> StoreResult<()>;

    /// Clear all submission stamps (session reopened)
    fn clear_submissions(&self) -> StoreResult<()>;

    /// Drop the whole roster (session reopened or reset)
    fn clear_students(&self) -> StoreResult<()>;

    // Violations

    /// Append a violation. Every call appends; repeats are never collapsed.
    fn log_violation(
        &self,
        id: &StudentId,
        kind: ViolationKind,
        details: Option<String>,
        now: DateTime<Local>,
    ) -> StoreResult<Violation>;

    fn violations_for(&self, id: &StudentId) -> StoreResult<Vec<Violation>>;

    fn all_violations(&self) -> StoreResult<Vec<Violation>>;

    fn violation_count(&self) -> StoreResult<u32>;

    /// Drop the violation log (session reopened or reset)
    fn clear_violations(&self) -> StoreResult<()>;

    // Answers

    /// Upsert one answer; the latest write wins
    fn save_answer(
        &self,
        id: &StudentId,
        question_id: &str,
        value: &str,
        now: DateTime<Local>,
    ) -> StoreResult<()>;

    /// Upsert a batch of answers in one transaction
    fn save_answers(
        &self,
        id: &StudentId,
        answers: &[AnswerPair],
        now: DateTime<Local>,
    ) -> StoreResult<()>;

    fn answers_for(&self, id: &StudentId) -> StoreResult<Vec<AnswerRow>>;

    /// Every student's answers, grouped per student, for grading
    fn all_results(&self) -> StoreResult<Vec<StudentResults>>;

    /// Drop all stored answers (session reopened or reset)
    fn clear_answers(&self) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
