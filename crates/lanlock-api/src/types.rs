//! Shared types for the lanlockd API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use lanlock_util::StudentId;
use std::fmt;

/// Lifecycle state of the singleton exam session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Setup,
    Lobby,
    Active,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Setup => "setup",
            SessionState::Lobby => "lobby",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(SessionState::Setup),
            "lobby" => Some(SessionState::Lobby),
            "active" => Some(SessionState::Active),
            "ended" => Some(SessionState::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative exam session record (singleton).
///
/// `started_at`/`ends_at` are set when the exam starts and survive into
/// `Ended` for grading. Mutated only by the session state machine; everyone
/// else gets read-only copies of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub state: SessionState,
    pub title: Option<String>,
    pub rules: Option<String>,
    pub exit_code: Option<String>,
    pub reg_password: Option<String>,
    pub eligible_ids: Option<Vec<StudentId>>,
    pub started_at: Option<DateTime<Local>>,
    pub ends_at: Option<DateTime<Local>>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            state: SessionState::Setup,
            title: None,
            rules: None,
            exit_code: None,
            reg_password: None,
            eligible_ids: None,
            started_at: None,
            ends_at: None,
        }
    }
}

/// Advisory connection status of one exam participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Online => "online",
            ConnectionStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(ConnectionStatus::Online),
            "offline" => Some(ConnectionStatus::Offline),
            _ => None,
        }
    }
}

/// One participant's tracked record as shown on the proctor roster.
///
/// `status` and `is_focused` are self-reported telemetry from an untrusted
/// client, surfaced for a human proctor and never used for enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: StudentId,
    pub name: String,
    pub address: String,
    pub status: ConnectionStatus,
    pub is_focused: bool,
    pub last_heartbeat: DateTime<Local>,
    pub connected_at: DateTime<Local>,
    pub submitted_at: Option<DateTime<Local>>,
}

/// Aggregate roster counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterStats {
    pub total: u32,
    pub online: u32,
    pub focused: u32,
    pub offline: u32,
    pub submitted: u32,
    pub violations: u32,
}

/// Full roster payload pushed to proctors on every change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub students: Vec<StudentRow>,
    pub stats: RosterStats,
}

/// Kind of a logged integrity violation.
///
/// Serialized as its database string form (`FOCUS_LOST`, `MULTI_MONITOR`);
/// unknown strings round-trip through `Other` so the log stays extensible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    FocusLost,
    MultiMonitor,
    Other(String),
}

impl ViolationKind {
    pub fn as_str(&self) -> &str {
        match self {
            ViolationKind::FocusLost => "FOCUS_LOST",
            ViolationKind::MultiMonitor => "MULTI_MONITOR",
            ViolationKind::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "FOCUS_LOST" => ViolationKind::FocusLost,
            "MULTI_MONITOR" => ViolationKind::MultiMonitor,
            other => ViolationKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ViolationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ViolationKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ViolationKind::parse(&s))
    }
}

/// One immutable entry in the violation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: i64,
    pub student_id: StudentId,
    pub kind: ViolationKind,
    pub details: Option<String>,
    pub timestamp: DateTime<Local>,
}

/// One stored answer for a `(student, question)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRow {
    pub question_id: String,
    pub value: String,
    pub saved_at: DateTime<Local>,
}

/// One `(question, value)` pair in a bulk answer upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPair {
    pub question_id: String,
    pub value: String,
}

/// All of one student's answers, for the grading export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentResults {
    pub student_id: StudentId,
    pub name: String,
    pub answers: Vec<AnswerRow>,
}

/// Source language of a sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    /// Source file extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

/// Outcome of one sandboxed compile-and-run.
///
/// The three failure kinds are deliberately distinct: a caller must be able
/// to tell "didn't compile" from "ran too long" from "exited nonzero".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    CompileFailed,
    TimedOut,
    RuntimeFailure { exit_code: Option<i32> },
}

/// Structured result of one sandboxed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub compile_ms: u64,
    pub exec_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// One test case for graded execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub expected_stdout: String,
}

/// Per-case grading result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub case: usize,
    pub passed: bool,
    pub stdout: String,
    pub stderr: String,
    pub status: RunStatus,
}

/// Aggregate grading result across all cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunReport {
    pub passed: usize,
    pub total: usize,
    pub all_passed: bool,
    pub results: Vec<TestCaseResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_round_trip() {
        for state in [
            SessionState::Setup,
            SessionState::Lobby,
            SessionState::Active,
            SessionState::Ended,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("paused"), None);
    }

    #[test]
    fn violation_kind_string_form() {
        assert_eq!(ViolationKind::FocusLost.as_str(), "FOCUS_LOST");
        assert_eq!(
            ViolationKind::parse("MULTI_MONITOR"),
            ViolationKind::MultiMonitor
        );
        assert_eq!(
            ViolationKind::parse("CLIPBOARD"),
            ViolationKind::Other("CLIPBOARD".into())
        );

        let json = serde_json::to_string(&ViolationKind::FocusLost).unwrap();
        assert_eq!(json, "\"FOCUS_LOST\"");
        let parsed: ViolationKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ViolationKind::FocusLost);
    }

    #[test]
    fn run_status_distinguishes_failures() {
        let timed_out = serde_json::to_string(&RunStatus::TimedOut).unwrap();
        let nonzero =
            serde_json::to_string(&RunStatus::RuntimeFailure { exit_code: Some(1) }).unwrap();
        let no_compile = serde_json::to_string(&RunStatus::CompileFailed).unwrap();
        assert_ne!(timed_out, nonzero);
        assert_ne!(timed_out, no_compile);
        assert_ne!(nonzero, no_compile);
    }

    #[test]
    fn default_session_record_is_setup() {
        let record = SessionRecord::default();
        assert_eq!(record.state, SessionState::Setup);
        assert!(record.started_at.is_none());
        assert!(record.ends_at.is_none());
    }
}
