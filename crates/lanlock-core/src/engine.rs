//! The proctoring engine
//!
//! Mediates every command against the stored session record and roster.
//! Mutating operations return the events the caller should fan out; the
//! engine itself never talks to sockets.

use chrono::{DateTime, Local};
use lanlock_api::{
    AnswerPair, AnswerRow, RosterSnapshot, SessionRecord, SessionState, StudentResults,
    StudentRow, Violation, ViolationKind,
};
use lanlock_store::{NewStudent, Store};
use lanlock_util::StudentId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    check_open_lobby, check_registration, check_start, check_stop, CoreError, CoreEvent,
    CoreResult, OpenLobbyParams,
};

/// The proctoring engine
pub struct ExamEngine {
    store: Arc<dyn Store>,
}

impl ExamEngine {
    pub fn new(store: Arc<dyn Store>) -> CoreResult<Self> {
        let session = store.get_session()?;
        info!(state = %session.state, "Engine initialized from stored session");
        Ok(Self { store })
    }

    /// Current session record
    pub fn session(&self) -> CoreResult<SessionRecord> {
        Ok(self.store.get_session()?)
    }

    /// Current roster snapshot
    pub fn roster(&self) -> CoreResult<RosterSnapshot> {
        Ok(self.store.roster()?)
    }

    // Session control

    /// Open the lobby. Allowed from `Setup` and `Ended`; wipes the previous
    /// run's roster, violations and answers so the new session starts clean.
    pub fn open_lobby(
        &self,
        params: OpenLobbyParams,
        _now: DateTime<Local>,
    ) -> CoreResult<(SessionRecord, Vec<CoreEvent>)> {
        let current = self.store.get_session()?;
        check_open_lobby(current.state)?;

        self.store.clear_students()?;
        self.store.clear_violations()?;
        self.store.clear_answers()?;

        let session = SessionRecord {
            state: SessionState::Lobby,
            title: Some(params.title),
            rules: Some(params.rules),
            exit_code: Some(params.exit_code),
            reg_password: params.reg_password,
            eligible_ids: params.eligible_ids,
            started_at: None,
            ends_at: None,
        };
        self.store.save_session(&session)?;

        info!(title = session.title.as_deref().unwrap_or(""), "Lobby opened");
        let events = vec![
            CoreEvent::SessionChanged(session.clone()),
            CoreEvent::RosterChanged(self.store.roster()?),
        ];
        Ok((session, events))
    }

    /// Start the exam. Allowed only from `Lobby`.
    pub fn start_exam(
        &self,
        duration_minutes: u64,
        now: DateTime<Local>,
    ) -> CoreResult<(SessionRecord, Vec<CoreEvent>)> {
        let mut session = self.store.get_session()?;
        check_start(session.state)?;

        // duration_minutes comes off the wire; an out-of-range value is a
        // rejected request, never an arithmetic panic
        let ends_at = i64::try_from(duration_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(CoreError::InvalidDuration(duration_minutes))?;

        session.state = SessionState::Active;
        session.started_at = Some(now);
        session.ends_at = Some(ends_at);
        self.store.save_session(&session)?;

        info!(duration_minutes, "Exam started");
        let events = vec![CoreEvent::SessionChanged(session.clone())];
        Ok((session, events))
    }

    /// Stop the exam. Allowed only from `Active`. Collected answers, the
    /// violation log and the session timestamps survive into `Ended` for
    /// grading; the next `open_lobby` or `reset` clears them.
    pub fn stop_exam(&self, _now: DateTime<Local>) -> CoreResult<(SessionRecord, Vec<CoreEvent>)> {
        let mut session = self.store.get_session()?;
        check_stop(session.state)?;

        session.state = SessionState::Ended;
        self.store.save_session(&session)?;

        info!("Exam stopped");
        let events = vec![CoreEvent::SessionChanged(session.clone())];
        Ok((session, events))
    }

    /// Reset to `Setup`, wiping everything. Allowed from any state.
    pub fn reset(&self) -> CoreResult<(SessionRecord, Vec<CoreEvent>)> {
        self.store.clear_students()?;
        self.store.clear_violations()?;
        self.store.clear_answers()?;

        let session = SessionRecord::default();
        self.store.save_session(&session)?;

        info!("Session reset");
        let events = vec![
            CoreEvent::SessionChanged(session.clone()),
            CoreEvent::RosterChanged(self.store.roster()?),
        ];
        Ok((session, events))
    }

    // Roster

    /// Register a student connection. Returns the session record the client
    /// should render, plus fan-out events. A self-reported display count
    /// above one is logged as a violation, never blocked.
    pub fn connect(
        &self,
        student: NewStudent,
        password: Option<&str>,
        display_count: u32,
        now: DateTime<Local>,
    ) -> CoreResult<(SessionRecord, Vec<CoreEvent>)> {
        let session = self.store.get_session()?;
        check_registration(&session, &student.id, password)?;

        self.store.upsert_student(&student, now)?;
        let mut events = Vec::new();

        if display_count > 1 {
            let violation = self.store.log_violation(
                &student.id,
                ViolationKind::MultiMonitor,
                Some(format!("{display_count} displays reported")),
                now,
            )?;
            events.push(CoreEvent::ViolationLogged(violation));
        }

        debug!(student_id = %student.id, "Student registered");
        events.push(CoreEvent::RosterChanged(self.store.roster()?));
        Ok((session, events))
    }

    /// Record a heartbeat. Emits a roster update only when something a
    /// proctor can see actually changed; steady-state beats are silent.
    pub fn heartbeat(
        &self,
        id: &StudentId,
        focused: bool,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        let before = self
            .store
            .get_student(id)?
            .ok_or_else(|| CoreError::NotRegistered(id.clone()))?;

        self.store.record_heartbeat(id, focused, now)?;

        let visible_change = before.status == lanlock_api::ConnectionStatus::Offline
            || before.is_focused != focused;
        if visible_change {
            Ok(vec![CoreEvent::RosterChanged(self.store.roster()?)])
        } else {
            Ok(Vec::new())
        }
    }

    /// Record an immediate focus transition. A loss of focus is a violation;
    /// regaining focus just refreshes the roster.
    pub fn focus_changed(
        &self,
        id: &StudentId,
        focused: bool,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<CoreEvent>> {
        if self.store.get_student(id)?.is_none() {
            return Err(CoreError::NotRegistered(id.clone()));
        }

        self.store.set_focus(id, focused)?;

        let mut events = Vec::new();
        if !focused {
            let violation =
                self.store
                    .log_violation(id, ViolationKind::FocusLost, None, now)?;
            events.push(CoreEvent::ViolationLogged(violation));
        }
        events.push(CoreEvent::RosterChanged(self.store.roster()?));
        Ok(events)
    }

    /// A student's socket dropped; presume offline immediately rather than
    /// waiting for the sweep.
    pub fn disconnect(&self, id: &StudentId) -> CoreResult<Vec<CoreEvent>> {
        self.store.set_offline(id)?;
        Ok(vec![CoreEvent::RosterChanged(self.store.roster()?)])
    }

    /// Flip silent students offline. Runs on the heartbeat cadence; emits
    /// one roster update per sweep that changed anything.
    pub fn sweep(&self, timeout: Duration, now: DateTime<Local>) -> CoreResult<Vec<CoreEvent>> {
        let flipped = self.store.mark_stale_offline(timeout, now)?;
        if flipped > 0 {
            info!(flipped, "Stale students marked offline");
            Ok(vec![CoreEvent::RosterChanged(self.store.roster()?)])
        } else {
            Ok(Vec::new())
        }
    }

    /// Look up one roster record
    pub fn student(&self, id: &StudentId) -> CoreResult<Option<StudentRow>> {
        Ok(self.store.get_student(id)?)
    }

    // Answers and submission

    pub fn save_answer(
        &self,
        id: &StudentId,
        question_id: &str,
        value: &str,
        now: DateTime<Local>,
    ) -> CoreResult<()> {
        self.require_registered(id)?;
        Ok(self.store.save_answer(id, question_id, value, now)?)
    }

    pub fn save_answers(
        &self,
        id: &StudentId,
        answers: &[AnswerPair],
        now: DateTime<Local>,
    ) -> CoreResult<()> {
        self.require_registered(id)?;
        Ok(self.store.save_answers(id, answers, now)?)
    }

    pub fn answers_for(&self, id: &StudentId) -> CoreResult<Vec<AnswerRow>> {
        Ok(self.store.answers_for(id)?)
    }

    /// Turn in the exam. Requires the exam to be running.
    pub fn submit(&self, id: &StudentId, now: DateTime<Local>) -> CoreResult<Vec<CoreEvent>> {
        let session = self.store.get_session()?;
        if session.state != SessionState::Active {
            return Err(CoreError::InvalidTransition {
                action: "submit",
                state: session.state,
            });
        }
        self.require_registered(id)?;

        self.store.set_submitted(id, now)?;
        info!(student_id = %id, "Exam submitted");
        Ok(vec![CoreEvent::RosterChanged(self.store.roster()?)])
    }

    pub fn results(&self) -> CoreResult<Vec<StudentResults>> {
        Ok(self.store.all_results()?)
    }

    // Violations

    pub fn violations(&self, student_id: Option<&StudentId>) -> CoreResult<Vec<Violation>> {
        match student_id {
            Some(id) => Ok(self.store.violations_for(id)?),
            None => Ok(self.store.all_violations()?),
        }
    }

    fn require_registered(&self, id: &StudentId) -> CoreResult<()> {
        if self.store.get_student(id)?.is_none() {
            return Err(CoreError::NotRegistered(id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlock_store::SqliteStore;

    fn engine() -> ExamEngine {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        ExamEngine::new(store).unwrap()
    }

    fn new_student(id: &str) -> NewStudent {
        NewStudent {
            id: StudentId::new(id),
            name: format!("Student {id}"),
            address: "10.0.0.2:40000".into(),
        }
    }

    fn open_params() -> OpenLobbyParams {
        OpenLobbyParams {
            title: "Final".into(),
            rules: "Closed book".into(),
            exit_code: "9999".into(),
            reg_password: None,
            eligible_ids: None,
        }
    }

    #[test]
    fn full_session_lifecycle() {
        let engine = engine();
        let now = lanlock_util::now();

        // Setup: cannot start or stop
        assert!(engine.start_exam(60, now).is_err());
        assert!(engine.stop_exam(now).is_err());

        let (session, _) = engine.open_lobby(open_params(), now).unwrap();
        assert_eq!(session.state, SessionState::Lobby);

        // Lobby is not reopenable
        assert!(engine.open_lobby(open_params(), now).is_err());

        let (session, _) = engine.start_exam(60, now).unwrap();
        assert_eq!(session.state, SessionState::Active);
        let ends = session.ends_at.unwrap();
        assert_eq!((ends - now).num_minutes(), 60);

        let (session, _) = engine.stop_exam(now).unwrap();
        assert_eq!(session.state, SessionState::Ended);

        // Ended -> Lobby rerun is allowed
        let (session, _) = engine.open_lobby(open_params(), now).unwrap();
        assert_eq!(session.state, SessionState::Lobby);
    }

    #[test]
    fn absurd_duration_rejected_without_panicking() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();

        assert!(matches!(
            engine.start_exam(u64::MAX, now),
            Err(CoreError::InvalidDuration(_))
        ));

        // Nothing was mutated; a sane start still works
        assert_eq!(engine.session().unwrap().state, SessionState::Lobby);
        engine.start_exam(60, now).unwrap();
    }

    #[test]
    fn stop_keeps_the_schedule_for_grading() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();

        let (started, _) = engine.start_exam(60, now).unwrap();
        let (stopped, _) = engine
            .stop_exam(now + chrono::Duration::minutes(5))
            .unwrap();

        assert_eq!(stopped.state, SessionState::Ended);
        assert_eq!(stopped.started_at, started.started_at);
        assert_eq!(stopped.ends_at, started.ends_at);
    }

    #[test]
    fn rejected_transition_leaves_state_untouched() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();

        assert!(engine.stop_exam(now).is_err());
        assert_eq!(engine.session().unwrap().state, SessionState::Lobby);
    }

    #[test]
    fn eligibility_and_password() {
        let engine = engine();
        let now = lanlock_util::now();
        let mut params = open_params();
        params.reg_password = Some("pw".into());
        params.eligible_ids = Some(vec![StudentId::new("s1"), StudentId::new("s2")]);
        engine.open_lobby(params, now).unwrap();

        assert!(engine.connect(new_student("s1"), Some("pw"), 1, now).is_ok());
        assert!(matches!(
            engine.connect(new_student("s3"), Some("pw"), 1, now),
            Err(CoreError::NotEligible(_))
        ));
        assert!(matches!(
            engine.connect(new_student("s2"), Some("nope"), 1, now),
            Err(CoreError::BadCredential)
        ));

        // The denied identities never reached the roster
        let roster = engine.roster().unwrap();
        assert_eq!(roster.stats.total, 1);
    }

    #[test]
    fn multi_monitor_logged_not_blocked() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();

        let (_, events) = engine.connect(new_student("s1"), None, 3, now).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::ViolationLogged(v) if v.kind == ViolationKind::MultiMonitor)));

        let roster = engine.roster().unwrap();
        assert_eq!(roster.stats.total, 1);
        assert_eq!(roster.stats.violations, 1);
    }

    #[test]
    fn focus_loss_is_a_violation() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();

        let id = StudentId::new("s1");
        let events = engine.focus_changed(&id, false, now).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::ViolationLogged(v) if v.kind == ViolationKind::FocusLost)));

        // Regaining focus refreshes the roster without logging anything
        let events = engine.focus_changed(&id, true, now).unwrap();
        assert!(!events
            .iter()
            .any(|e| matches!(e, CoreEvent::ViolationLogged(_))));
        assert_eq!(engine.violations(Some(&id)).unwrap().len(), 1);
    }

    #[test]
    fn repeated_focus_loss_appends_every_time() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();

        let id = StudentId::new("s1");
        for i in 0..4 {
            engine
                .focus_changed(&id, false, now + chrono::Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(engine.violations(Some(&id)).unwrap().len(), 4);
    }

    #[test]
    fn heartbeat_is_silent_at_steady_state() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();

        let id = StudentId::new("s1");
        let events = engine
            .heartbeat(&id, true, now + chrono::Duration::seconds(5))
            .unwrap();
        assert!(events.is_empty());

        // A heartbeat from an offline student brings it back with a push
        engine.disconnect(&id).unwrap();
        let events = engine
            .heartbeat(&id, true, now + chrono::Duration::seconds(10))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn heartbeat_requires_registration() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();

        assert!(matches!(
            engine.heartbeat(&StudentId::new("ghost"), true, now),
            Err(CoreError::NotRegistered(_))
        ));
    }

    #[test]
    fn sweep_flips_stale_students_once() {
        let engine = engine();
        let t0 = lanlock_util::now();
        engine.open_lobby(open_params(), t0).unwrap();
        engine.connect(new_student("s1"), None, 1, t0).unwrap();
        engine.connect(new_student("s2"), None, 1, t0).unwrap();

        // s2 beats at t+12, s1 goes silent after connect
        engine
            .heartbeat(&StudentId::new("s2"), true, t0 + chrono::Duration::seconds(12))
            .unwrap();

        let events = engine
            .sweep(Duration::from_secs(10), t0 + chrono::Duration::seconds(15))
            .unwrap();
        assert_eq!(events.len(), 1);

        // Nothing left to flip on the next cadence tick
        let events = engine
            .sweep(Duration::from_secs(10), t0 + chrono::Duration::seconds(20))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn submit_requires_active_exam() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();

        let id = StudentId::new("s1");
        assert!(matches!(
            engine.submit(&id, now),
            Err(CoreError::InvalidTransition { .. })
        ));

        engine.start_exam(60, now).unwrap();
        engine.submit(&id, now).unwrap();
        assert_eq!(engine.roster().unwrap().stats.submitted, 1);
    }

    #[test]
    fn answers_survive_stop_but_not_reopen() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();
        engine.start_exam(60, now).unwrap();

        let id = StudentId::new("s1");
        engine.save_answer(&id, "q1", "42", now).unwrap();
        engine.stop_exam(now).unwrap();

        // Grading still sees the answers after the exam ends
        let results = engine.results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].answers.len(), 1);

        // Reopening wipes the previous run entirely
        engine.open_lobby(open_params(), now).unwrap();
        assert!(engine.results().unwrap().is_empty());
        assert_eq!(engine.roster().unwrap().stats.total, 0);
        assert!(engine.violations(None).unwrap().is_empty());
    }

    #[test]
    fn reset_from_any_state() {
        let engine = engine();
        let now = lanlock_util::now();
        engine.open_lobby(open_params(), now).unwrap();
        engine.connect(new_student("s1"), None, 1, now).unwrap();
        engine.start_exam(60, now).unwrap();

        let (session, _) = engine.reset().unwrap();
        assert_eq!(session.state, SessionState::Setup);
        assert_eq!(engine.roster().unwrap().stats.total, 0);
    }
}
