//! Integration tests for lanlockd
//!
//! These exercise the engine and store together through a full exam day,
//! the way the daemon loop drives them.

use lanlock_core::{CoreError, CoreEvent, ExamEngine, OpenLobbyParams};
use lanlock_store::{NewStudent, SqliteStore, Store};
use lanlock_util::StudentId;
use lanlock_api::{SessionState, ViolationKind};
use std::sync::Arc;
use std::time::Duration;

fn make_engine() -> ExamEngine {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    ExamEngine::new(store).unwrap()
}

fn student(id: &str, name: &str) -> NewStudent {
    NewStudent {
        id: StudentId::new(id),
        name: name.into(),
        address: "192.168.1.20:50000".into(),
    }
}

fn lobby(eligible: Option<Vec<&str>>) -> OpenLobbyParams {
    OpenLobbyParams {
        title: "CS101 Final".into(),
        rules: "No notes".into(),
        exit_code: "4711".into(),
        reg_password: None,
        eligible_ids: eligible
            .map(|ids| ids.into_iter().map(StudentId::new).collect()),
    }
}

#[test]
fn exam_day_end_to_end() {
    let engine = make_engine();
    let t0 = lanlock_util::now();

    // Proctor opens a lobby restricted to two students
    engine.open_lobby(lobby(Some(vec!["s1", "s2"])), t0).unwrap();

    // s1 and s2 join; s3 is turned away without touching the roster
    engine.connect(student("s1", "Ada"), None, 1, t0).unwrap();
    engine.connect(student("s2", "Grace"), None, 2, t0).unwrap();
    assert!(matches!(
        engine.connect(student("s3", "Mallory"), None, 1, t0),
        Err(CoreError::NotEligible(_))
    ));

    // Grace's second display was logged on connect
    let violations = engine.violations(Some(&StudentId::new("s2"))).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::MultiMonitor);

    // Exam starts for 90 minutes
    let (session, _) = engine.start_exam(90, t0).unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!((session.ends_at.unwrap() - t0).num_minutes(), 90);

    // Ada answers and loses focus once along the way
    let ada = StudentId::new("s1");
    engine.save_answer(&ada, "q1", "O(n log n)", t0).unwrap();
    engine.focus_changed(&ada, false, t0).unwrap();
    engine.focus_changed(&ada, true, t0).unwrap();
    engine.save_answer(&ada, "q1", "O(n)", t0).unwrap();

    // Ada turns in and the roster reflects it
    engine.submit(&ada, t0).unwrap();
    let roster = engine.roster().unwrap();
    assert_eq!(roster.stats.submitted, 1);
    assert_eq!(roster.stats.violations, 2);

    // Grace goes silent; the sweep flips her offline exactly once
    engine
        .heartbeat(&ada, true, t0 + chrono::Duration::seconds(12))
        .unwrap();
    let events = engine
        .sweep(Duration::from_secs(10), t0 + chrono::Duration::seconds(15))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(engine
        .sweep(Duration::from_secs(10), t0 + chrono::Duration::seconds(20))
        .unwrap()
        .is_empty());

    // Proctor stops the exam; answers remain for grading, with the last
    // write winning
    engine.stop_exam(t0 + chrono::Duration::minutes(90)).unwrap();
    let results = engine.results().unwrap();
    let ada_results = results.iter().find(|r| r.name == "Ada").unwrap();
    assert_eq!(ada_results.answers[0].value, "O(n)");
}

#[test]
fn session_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanlockd.db");
    let t0 = lanlock_util::now();

    {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
        let engine = ExamEngine::new(store).unwrap();
        engine.open_lobby(lobby(None), t0).unwrap();
        engine.connect(student("s1", "Ada"), None, 1, t0).unwrap();
        engine.start_exam(60, t0).unwrap();
        engine
            .save_answer(&StudentId::new("s1"), "q1", "42", t0)
            .unwrap();
    }

    // Daemon restarts mid-exam; everything is still there
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
    let engine = ExamEngine::new(store).unwrap();

    let session = engine.session().unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert_eq!(engine.roster().unwrap().stats.total, 1);
    assert_eq!(
        engine
            .answers_for(&StudentId::new("s1"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn rerun_starts_clean() {
    let engine = make_engine();
    let t0 = lanlock_util::now();

    engine.open_lobby(lobby(None), t0).unwrap();
    engine.connect(student("s1", "Ada"), None, 3, t0).unwrap();
    engine.start_exam(60, t0).unwrap();
    engine
        .save_answer(&StudentId::new("s1"), "q1", "x", t0)
        .unwrap();
    engine.stop_exam(t0).unwrap();

    // Second sitting: nothing from the first bleeds through
    let (session, events) = engine.open_lobby(lobby(None), t0).unwrap();
    assert_eq!(session.state, SessionState::Lobby);
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::RosterChanged(r) if r.students.is_empty())));
    assert!(engine.violations(None).unwrap().is_empty());
    assert!(engine.results().unwrap().is_empty());
}
