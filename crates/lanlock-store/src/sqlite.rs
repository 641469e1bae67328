//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use lanlock_api::{
    AnswerPair, AnswerRow, ConnectionStatus, RosterSnapshot, RosterStats, SessionRecord,
    SessionState, StudentResults, StudentRow, Violation, ViolationKind,
};
use lanlock_util::StudentId;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{NewStudent, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run a write. If it fails and the store is file-backed, reopen the
    /// database and retry once before giving up; a mid-exam daemon should
    /// survive a transient I/O hiccup without losing subsequent writes.
    fn write<T>(&self, op: impl Fn(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock().unwrap();
        match op(&conn) {
            Ok(value) => Ok(value),
            Err(first) => {
                let path = match &self.path {
                    Some(p) => p,
                    None => return Err(first),
                };
                warn!(error = %first, "Store write failed, reopening database for one retry");
                let fresh = Connection::open(path)?;
                init_schema(&fresh)?;
                *conn = fresh;
                op(&conn)
            }
        }
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        -- Singleton session record
        CREATE TABLE IF NOT EXISTS exam_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            state TEXT NOT NULL,
            title TEXT,
            rules TEXT,
            exit_code TEXT,
            reg_password TEXT,
            eligible_ids TEXT,
            started_at TEXT,
            ends_at TEXT
        );

        -- Roster
        CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            status TEXT NOT NULL,
            is_focused INTEGER NOT NULL DEFAULT 1,
            last_heartbeat TEXT NOT NULL,
            connected_at TEXT NOT NULL,
            submitted_at TEXT
        );

        -- Violation log (append-only)
        CREATE TABLE IF NOT EXISTS violations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            details TEXT,
            timestamp TEXT NOT NULL
        );

        -- Stored answers
        CREATE TABLE IF NOT EXISTS answers (
            student_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            value TEXT NOT NULL,
            saved_at TEXT NOT NULL,
            PRIMARY KEY (student_id, question_id)
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_violations_student ON violations(student_id);
        "#,
    )?;

    debug!("Store schema initialized");
    Ok(())
}

fn parse_timestamp(s: &str) -> DateTime<Local> {
    lanlock_util::parse_rfc3339(s).unwrap_or_else(lanlock_util::now)
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let address: String = row.get(2)?;
    let status: String = row.get(3)?;
    let is_focused: bool = row.get(4)?;
    let last_heartbeat: String = row.get(5)?;
    let connected_at: String = row.get(6)?;
    let submitted_at: Option<String> = row.get(7)?;

    Ok(StudentRow {
        id: StudentId::new(id),
        name,
        address,
        status: ConnectionStatus::parse(&status).unwrap_or(ConnectionStatus::Offline),
        is_focused,
        last_heartbeat: parse_timestamp(&last_heartbeat),
        connected_at: parse_timestamp(&connected_at),
        submitted_at: submitted_at.as_deref().map(parse_timestamp),
    })
}

fn violation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Violation> {
    let id: i64 = row.get(0)?;
    let student_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let details: Option<String> = row.get(3)?;
    let timestamp: String = row.get(4)?;

    Ok(Violation {
        id,
        student_id: StudentId::new(student_id),
        kind: ViolationKind::parse(&kind),
        details,
        timestamp: parse_timestamp(&timestamp),
    })
}

impl Store for SqliteStore {
    fn get_session(&self) -> StoreResult<SessionRecord> {
        let conn = self.conn.lock().unwrap();

        let row = conn
            .query_row(
                r#"
                SELECT state, title, rules, exit_code, reg_password,
                       eligible_ids, started_at, ends_at
                FROM exam_state WHERE id = 1
                "#,
                [],
                |row| {
                    let state: String = row.get(0)?;
                    let title: Option<String> = row.get(1)?;
                    let rules: Option<String> = row.get(2)?;
                    let exit_code: Option<String> = row.get(3)?;
                    let reg_password: Option<String> = row.get(4)?;
                    let eligible_ids: Option<String> = row.get(5)?;
                    let started_at: Option<String> = row.get(6)?;
                    let ends_at: Option<String> = row.get(7)?;
                    Ok((
                        state,
                        title,
                        rules,
                        exit_code,
                        reg_password,
                        eligible_ids,
                        started_at,
                        ends_at,
                    ))
                },
            )
            .optional()?;

        let Some((state, title, rules, exit_code, reg_password, eligible_json, started, ends)) =
            row
        else {
            return Ok(SessionRecord::default());
        };

        let eligible_ids = match eligible_json {
            Some(json) => Some(serde_json::from_str::<Vec<StudentId>>(&json)?),
            None => None,
        };

        Ok(SessionRecord {
            state: SessionState::parse(&state).unwrap_or(SessionState::Setup),
            title,
            rules,
            exit_code,
            reg_password,
            eligible_ids,
            started_at: started.as_deref().map(parse_timestamp),
            ends_at: ends.as_deref().map(parse_timestamp),
        })
    }

    fn save_session(&self, session: &SessionRecord) -> StoreResult<()> {
        let eligible_json = match &session.eligible_ids {
            Some(ids) => Some(serde_json::to_string(ids)?),
            None => None,
        };
        let state = session.state.as_str().to_string();
        let started_at = session.started_at.map(|t| t.to_rfc3339());
        let ends_at = session.ends_at.map(|t| t.to_rfc3339());

        self.write(move |conn| {
            conn.execute(
                r#"
                INSERT INTO exam_state
                    (id, state, title, rules, exit_code, reg_password,
                     eligible_ids, started_at, ends_at)
                VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    title = excluded.title,
                    rules = excluded.rules,
                    exit_code = excluded.exit_code,
                    reg_password = excluded.reg_password,
                    eligible_ids = excluded.eligible_ids,
                    started_at = excluded.started_at,
                    ends_at = excluded.ends_at
                "#,
                params![
                    state,
                    session.title,
                    session.rules,
                    session.exit_code,
                    session.reg_password,
                    eligible_json,
                    started_at,
                    ends_at,
                ],
            )?;
            Ok(())
        })?;

        debug!(state = %session.state, "Session record saved");
        Ok(())
    }

    fn upsert_student(&self, student: &NewStudent, now: DateTime<Local>) -> StoreResult<()> {
        let now_str = now.to_rfc3339();
        self.write(move |conn| {
            conn.execute(
                r#"
                INSERT INTO students
                    (id, name, address, status, is_focused, last_heartbeat, connected_at)
                VALUES (?, ?, ?, 'online', 1, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    address = excluded.address,
                    status = 'online',
                    is_focused = 1,
                    last_heartbeat = excluded.last_heartbeat
                "#,
                params![
                    student.id.as_str(),
                    student.name,
                    student.address,
                    now_str,
                    now_str
                ],
            )?;
            Ok(())
        })?;

        debug!(student_id = %student.id, "Student upserted");
        Ok(())
    }

    fn record_heartbeat(
        &self,
        id: &StudentId,
        focused: bool,
        now: DateTime<Local>,
    ) -> StoreResult<bool> {
        let now_str = now.to_rfc3339();
        self.write(move |conn| {
            let changed = conn.execute(
                "UPDATE students SET last_heartbeat = ?, is_focused = ?, status = 'online'
                 WHERE id = ?",
                params![now_str, focused, id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    fn set_focus(&self, id: &StudentId, focused: bool) -> StoreResult<()> {
        self.write(move |conn| {
            conn.execute(
                "UPDATE students SET is_focused = ? WHERE id = ?",
                params![focused, id.as_str()],
            )?;
            Ok(())
        })
    }

    fn set_offline(&self, id: &StudentId) -> StoreResult<()> {
        self.write(move |conn| {
            conn.execute(
                "UPDATE students SET status = 'offline' WHERE id = ?",
                [id.as_str()],
            )?;
            Ok(())
        })
    }

    fn mark_stale_offline(&self, timeout: Duration, now: DateTime<Local>) -> StoreResult<usize> {
        // Timestamps are compared after parsing rather than as SQL text, so
        // offset changes between writes cannot skew the comparison.
        let cutoff = now - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());

        self.write(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id, last_heartbeat FROM students WHERE status = 'online'")?;
            let rows = stmt.query_map([], |row| {
                let id: String = row.get(0)?;
                let beat: String = row.get(1)?;
                Ok((id, beat))
            })?;

            let mut stale = Vec::new();
            for row in rows {
                let (id, beat) = row?;
                if parse_timestamp(&beat) < cutoff {
                    stale.push(id);
                }
            }

            for id in &stale {
                conn.execute(
                    "UPDATE students SET status = 'offline', is_focused = 0 WHERE id = ?",
                    [id],
                )?;
            }
            Ok(stale.len())
        })
    }

    fn get_student(&self, id: &StudentId) -> StoreResult<Option<StudentRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, address, status, is_focused, last_heartbeat,
                        connected_at, submitted_at
                 FROM students WHERE id = ?",
                [id.as_str()],
                student_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn get_students(&self) -> StoreResult<Vec<StudentRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, status, is_focused, last_heartbeat,
                    connected_at, submitted_at
             FROM students ORDER BY name, id",
        )?;
        let rows = stmt.query_map([], student_from_row)?;

        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }

    fn roster(&self) -> StoreResult<RosterSnapshot> {
        let students = self.get_students()?;
        let violations = self.violation_count()?;

        let mut stats = RosterStats {
            total: students.len() as u32,
            violations,
            ..RosterStats::default()
        };
        for s in &students {
            match s.status {
                ConnectionStatus::Online => {
                    stats.online += 1;
                    if s.is_focused {
                        stats.focused += 1;
                    }
                }
                ConnectionStatus::Offline => stats.offline += 1,
            }
            if s.submitted_at.is_some() {
                stats.submitted += 1;
            }
        }

        Ok(RosterSnapshot { students, stats })
    }

    fn set_submitted(&self, id: &StudentId, now: DateTime<Local>) -> StoreResult<()> {
        let now_str = now.to_rfc3339();
        self.write(move |conn| {
            conn.execute(
                "UPDATE students SET submitted_at = ? WHERE id = ?",
                params![now_str, id.as_str()],
            )?;
            Ok(())
        })
    }

    fn clear_submissions(&self) -> StoreResult<()> {
        self.write(|conn| {
            conn.execute("UPDATE students SET submitted_at = NULL", [])?;
            Ok(())
        })
    }

    fn clear_students(&self) -> StoreResult<()> {
        self.write(|conn| {
            conn.execute("DELETE FROM students", [])?;
            Ok(())
        })
    }

    fn log_violation(
        &self,
        id: &StudentId,
        kind: ViolationKind,
        details: Option<String>,
        now: DateTime<Local>,
    ) -> StoreResult<Violation> {
        let now_str = now.to_rfc3339();
        let kind_str = kind.as_str().to_string();
        let details_param = details.clone();
        let row_id = self.write(move |conn| {
            conn.execute(
                "INSERT INTO violations (student_id, kind, details, timestamp)
                 VALUES (?, ?, ?, ?)",
                params![id.as_str(), kind_str, details_param, now_str],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(student_id = %id, kind = %kind, "Violation logged");
        Ok(Violation {
            id: row_id,
            student_id: id.clone(),
            kind,
            details,
            timestamp: now,
        })
    }

    fn violations_for(&self, id: &StudentId) -> StoreResult<Vec<Violation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, student_id, kind, details, timestamp
             FROM violations WHERE student_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([id.as_str()], violation_from_row)?;

        let mut violations = Vec::new();
        for row in rows {
            violations.push(row?);
        }
        Ok(violations)
    }

    fn all_violations(&self) -> StoreResult<Vec<Violation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, student_id, kind, details, timestamp FROM violations ORDER BY id",
        )?;
        let rows = stmt.query_map([], violation_from_row)?;

        let mut violations = Vec::new();
        for row in rows {
            violations.push(row?);
        }
        Ok(violations)
    }

    fn violation_count(&self) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM violations", [], |row| row.get(0))?;
        Ok(count as u32)
    }

    fn clear_violations(&self) -> StoreResult<()> {
        self.write(|conn| {
            conn.execute("DELETE FROM violations", [])?;
            Ok(())
        })
    }

    fn save_answer(
        &self,
        id: &StudentId,
        question_id: &str,
        value: &str,
        now: DateTime<Local>,
    ) -> StoreResult<()> {
        let now_str = now.to_rfc3339();
        self.write(move |conn| {
            conn.execute(
                r#"
                INSERT INTO answers (student_id, question_id, value, saved_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(student_id, question_id)
                DO UPDATE SET value = excluded.value, saved_at = excluded.saved_at
                "#,
                params![id.as_str(), question_id, value, now_str],
            )?;
            Ok(())
        })
    }

    fn save_answers(
        &self,
        id: &StudentId,
        answers: &[AnswerPair],
        now: DateTime<Local>,
    ) -> StoreResult<()> {
        let now_str = now.to_rfc3339();
        self.write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for answer in answers {
                tx.execute(
                    r#"
                    INSERT INTO answers (student_id, question_id, value, saved_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(student_id, question_id)
                    DO UPDATE SET value = excluded.value, saved_at = excluded.saved_at
                    "#,
                    params![id.as_str(), answer.question_id, answer.value, now_str],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn answers_for(&self, id: &StudentId) -> StoreResult<Vec<AnswerRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT question_id, value, saved_at
             FROM answers WHERE student_id = ? ORDER BY question_id",
        )?;
        let rows = stmt.query_map([id.as_str()], |row| {
            let question_id: String = row.get(0)?;
            let value: String = row.get(1)?;
            let saved_at: String = row.get(2)?;
            Ok(AnswerRow {
                question_id,
                value,
                saved_at: parse_timestamp(&saved_at),
            })
        })?;

        let mut answers = Vec::new();
        for row in rows {
            answers.push(row?);
        }
        Ok(answers)
    }

    fn all_results(&self) -> StoreResult<Vec<StudentResults>> {
        let students = self.get_students()?;

        let mut results = Vec::with_capacity(students.len());
        for student in students {
            let answers = self.answers_for(&student.id)?;
            results.push(StudentResults {
                student_id: student.id,
                name: student.name,
                answers,
            });
        }
        Ok(results)
    }

    fn clear_answers(&self) -> StoreResult<()> {
        self.write(|conn| {
            conn.execute("DELETE FROM answers", [])?;
            Ok(())
        })
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
