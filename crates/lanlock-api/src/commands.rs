//! Command types for the lanlockd protocol

use serde::{Deserialize, Serialize};
use lanlock_util::StudentId;

use crate::{
    AnswerPair, AnswerRow, Language, RosterSnapshot, RunReport, SessionRecord, StudentResults,
    TestCase, TestRunReport, Violation, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol.
///
/// Sandboxed-run outcomes are not here: compile failure, timeout and nonzero
/// exit are data (`RunStatus`), not request errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    /// Session state machine rule violated; nothing was mutated
    InvalidTransition,
    /// Identity not on the session's allow-list
    NotEligible,
    /// Registration password mismatch
    BadCredential,
    /// Student command sent before a successful `connect`
    NotRegistered,
    StorageError,
    InternalError,
}

/// All possible commands from clients.
///
/// Student commands other than `connect` require the connection to be bound
/// to a student identity; proctor control commands require a proctor binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Student surface

    /// Register this connection as a student and upsert the roster record.
    /// Display metadata is self-reported; a count above one is logged as a
    /// violation, never enforced.
    Connect {
        student_id: StudentId,
        name: String,
        password: Option<String>,
        #[serde(default)]
        display_count: u32,
        #[serde(default)]
        displays: Option<serde_json::Value>,
    },

    /// Periodic liveness + focus report
    Heartbeat { focused: bool },

    /// Immediate focus transition, ahead of the next heartbeat
    FocusChanged { focused: bool },

    /// Ask the proctors for permission to leave mid-exam
    ExitRequest { reason: String },

    /// Upsert one answer (last write wins)
    SaveAnswer { question_id: String, value: String },

    /// Upsert many answers at once
    SaveAnswers { answers: Vec<AnswerPair> },

    /// Fetch all of this student's stored answers
    GetAnswers,

    /// Mark this student's exam as turned in
    SubmitExam,

    /// Compile and run submitted code in the sandbox
    RunCode {
        language: Language,
        source: String,
        #[serde(default)]
        stdin: String,
    },

    /// Run submitted code against a list of graded test cases
    RunTests {
        language: Language,
        source: String,
        cases: Vec<TestCase>,
    },

    // Shared

    /// Get the current session record
    GetSession,

    /// Ping for keepalive
    Ping,

    // Proctor surface

    /// Register this connection as a proctor (joins the audience channel)
    ProctorConnect,

    /// Open the lobby: fresh session, cleared roster
    OpenLobby {
        title: String,
        rules: String,
        exit_code: String,
        reg_password: Option<String>,
        eligible_ids: Option<Vec<StudentId>>,
    },

    /// Start the exam from the lobby
    StartExam { duration_minutes: u64 },

    /// End the running exam
    StopExam,

    /// Reset everything back to setup
    ResetExam,

    /// Fetch the current roster snapshot
    GetRoster,

    /// Fetch the violation log, optionally for one student
    GetViolations { student_id: Option<StudentId> },

    /// Fetch all answers grouped per student, for grading
    GetResults,

    /// Grant a pending exit request (routed to that student only)
    ExitApprove { student_id: StudentId },

    /// Deny a pending exit request (routed to that student only)
    ExitDeny { student_id: StudentId },
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Registration accepted; carries the current session record so the
    /// client can render the right screen without waiting for a push
    Connected { session: SessionRecord },
    Session(SessionRecord),
    Roster(RosterSnapshot),
    Violations(Vec<Violation>),
    Answers(Vec<AnswerRow>),
    Results(Vec<StudentResults>),
    Run(RunReport),
    TestRun(TestRunReport),
    Ack,
    Pong,
}
