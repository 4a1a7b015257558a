use assert_matches::assert_matches;

use typerank::records;
use typerank::store::{self, Database};
use typerank::{Engine, Error, GuestToken, Owner, SessionState, Submission, TestDuration, UserId};

fn engine() -> Engine {
    Engine::new(Database::open_in_memory().unwrap())
}

fn submit(typed: &str, elapsed_secs: f64) -> Submission {
    Submission {
        typed_text: typed.to_string(),
        elapsed_secs,
        ..Submission::default()
    }
}

fn guest(token: &str) -> Owner {
    Owner::Guest(GuestToken::new(token).unwrap())
}

#[test]
fn guest_session_completes_without_stats() {
    let engine = engine();
    let owner = guest("browser-session-1");
    let session = engine
        .start(owner.clone(), TestDuration::Thirty, "hello world")
        .unwrap();
    assert_eq!(session.state, SessionState::Pending);
    assert_eq!(session.metrics.wpm, 0.0);
    assert!(session.typed_text.is_empty());
    assert!(session.completed_at.is_none());

    let result = engine.complete(session.id, &owner, submit("hello", 6.0)).unwrap();
    assert!(!result.is_new_record);
    assert_eq!(result.metrics.correct_chars, 5);
    assert_eq!(result.metrics.incorrect_chars, 6);
    assert_eq!(result.metrics.total_chars, 5);
    assert_eq!(result.metrics.accuracy, 45.45);
    assert_eq!(result.session.state, SessionState::Completed);
    assert!(result.session.completed_at.is_some());

    let any_stats: i64 = engine
        .db()
        .read(|c| Ok(c.query_row("SELECT COUNT(*) FROM user_stats", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(any_stats, 0);
}

#[test]
fn duration_and_reference_text_survive_completion() {
    let engine = engine();
    let owner = Owner::User(UserId(1));
    let reference = "Pack my box with five dozen liquor jugs.";
    let session = engine.start(owner.clone(), TestDuration::Fifteen, reference).unwrap();

    engine
        .complete(session.id, &owner, submit("Pack my box with", 15.0))
        .unwrap();

    let stored = engine.session(session.id, &owner).unwrap();
    assert_eq!(stored.duration, TestDuration::Fifteen);
    assert_eq!(stored.reference_text.as_bytes(), reference.as_bytes());
    assert_eq!(stored.typed_text, "Pack my box with");
}

#[test]
fn ownership_is_enforced_for_guests_and_users() {
    let engine = engine();

    let guest_owner = guest("token-a");
    let guest_session = engine
        .start(guest_owner.clone(), TestDuration::Thirty, "abc")
        .unwrap();
    assert_matches!(
        engine.complete(guest_session.id, &guest("token-b"), submit("abc", 2.0)),
        Err(Error::Unauthorized)
    );
    assert_matches!(
        engine.complete(guest_session.id, &Owner::User(UserId(1)), submit("abc", 2.0)),
        Err(Error::Unauthorized)
    );

    let user_session = engine
        .start(Owner::User(UserId(1)), TestDuration::Thirty, "abc")
        .unwrap();
    assert_matches!(
        engine.complete(user_session.id, &Owner::User(UserId(2)), submit("abc", 2.0)),
        Err(Error::Unauthorized)
    );
    assert_matches!(
        engine.complete(user_session.id, &guest("token-a"), submit("abc", 2.0)),
        Err(Error::Unauthorized)
    );

    // neither session was touched
    for (id, owner) in [
        (guest_session.id, guest_owner),
        (user_session.id, Owner::User(UserId(1))),
    ] {
        let stored = engine.session(id, &owner).unwrap();
        assert_eq!(stored.state, SessionState::Pending);
    }
}

#[test]
fn second_completion_is_rejected_and_changes_nothing() {
    let engine = engine();
    let owner = Owner::User(UserId(7));
    let session = engine.start(owner.clone(), TestDuration::Sixty, "steady hands").unwrap();

    let first = engine
        .complete(session.id, &owner, submit("steady hands", 6.0))
        .unwrap();
    let err = engine
        .complete(session.id, &owner, submit("s", 1.0))
        .unwrap_err();
    assert_matches!(err, Error::AlreadyCompleted(id) if id == session.id);

    let stored = engine.session(session.id, &owner).unwrap();
    assert_eq!(stored, first.session);

    let stats = engine.user_stats(UserId(7)).unwrap();
    assert_eq!(stats.total_tests, 1);
    assert_eq!(stats.completed_tests, 1);
}

#[test]
fn zero_elapsed_time_scores_zero() {
    let engine = engine();
    let owner = Owner::User(UserId(2));
    for elapsed in [0.0, -5.0] {
        let session = engine.start(owner.clone(), TestDuration::Thirty, "abc").unwrap();
        let result = engine.complete(session.id, &owner, submit("abc", elapsed)).unwrap();
        assert_eq!(result.metrics, typerank::Metrics::zero());
        assert_eq!(result.session.state, SessionState::Completed);
    }
    let stats = engine.user_stats(UserId(2)).unwrap();
    assert_eq!(stats.total_time_typed, 0);
    assert_eq!(stats.completed_tests, 2);
}

#[test]
fn non_finite_and_huge_elapsed_times_complete() {
    let engine = engine();
    let owner = Owner::User(UserId(8));

    let mut ids = Vec::new();
    for elapsed in [f64::NAN, f64::INFINITY, 1e19, 1e19] {
        let session = engine.start(owner.clone(), TestDuration::Thirty, "abc").unwrap();
        let result = engine.complete(session.id, &owner, submit("abc", elapsed)).unwrap();
        assert_eq!(result.session.state, SessionState::Completed);
        ids.push((session.id, elapsed));
    }

    for (id, elapsed) in ids {
        let stored = engine.session(id, &owner).unwrap();
        assert_eq!(stored.state, SessionState::Completed);
        if elapsed.is_finite() {
            assert_eq!(stored.typing_time, elapsed);
            assert_eq!(stored.metrics.wpm, 0.0);
            assert_eq!(stored.metrics.accuracy, 100.0);
        } else {
            assert_eq!(stored.typing_time, 0.0);
            assert_eq!(stored.metrics, typerank::Metrics::zero());
        }
    }

    let stats = engine.user_stats(UserId(8)).unwrap();
    assert_eq!(stats.completed_tests, 4);
    assert_eq!(stats.total_time_typed, records::MAX_TOTAL_TIME_TYPED);
    assert_eq!(stats.avg_wpm, 0.0);
}

#[test]
fn averages_over_three_sessions() {
    let engine = engine();
    let owner = Owner::User(UserId(11));
    // 100 correct characters; 60s gives 20 wpm, 30s gives 40, 20s gives 60
    let reference = "a".repeat(100);
    let mut records = Vec::new();
    for elapsed in [60.0, 30.0, 20.0] {
        let session = engine
            .start(owner.clone(), TestDuration::Sixty, reference.clone())
            .unwrap();
        let result = engine
            .complete(session.id, &owner, submit(&reference, elapsed))
            .unwrap();
        records.push((result.metrics.wpm, result.is_new_record));
    }

    assert_eq!(records, vec![(20.0, true), (40.0, true), (60.0, true)]);
    let stats = engine.user_stats(UserId(11)).unwrap();
    assert_eq!(stats.avg_wpm, 40.0);
    assert_eq!(stats.avg_accuracy, 100.0);
    assert_eq!(stats.best_wpm_for(TestDuration::Sixty), Some(60.0));
    assert_eq!(stats.best_accuracy_for(TestDuration::Sixty), Some(100.0));
    assert_eq!(stats.total_tests, 3);
    assert_eq!(stats.completion_rate, 100.0);
    assert_eq!(stats.total_time_typed, 110);
    assert_eq!(stats.current_streak, 1);
}

#[test]
fn slower_session_is_not_a_record() {
    let engine = engine();
    let owner = Owner::User(UserId(3));
    let reference = "b".repeat(50);

    let fast = engine.start(owner.clone(), TestDuration::Thirty, reference.clone()).unwrap();
    assert!(engine.complete(fast.id, &owner, submit(&reference, 10.0)).unwrap().is_new_record);

    let slow = engine.start(owner.clone(), TestDuration::Thirty, reference.clone()).unwrap();
    let result = engine.complete(slow.id, &owner, submit(&reference, 20.0)).unwrap();
    assert!(!result.is_new_record);

    // a different duration bucket has its own record
    let other = engine.start(owner.clone(), TestDuration::Fifteen, reference.clone()).unwrap();
    assert!(engine.complete(other.id, &owner, submit(&reference, 30.0)).unwrap().is_new_record);

    let stats = engine.user_stats(UserId(3)).unwrap();
    assert_eq!(stats.best_wpm_for(TestDuration::Thirty), Some(60.0));
    assert_eq!(stats.best_wpm_for(TestDuration::Fifteen), Some(20.0));
}

#[test]
fn record_check_must_precede_stats_update() {
    let db = Database::open_in_memory().unwrap();
    let owner = Owner::User(UserId(21));
    let new = typerank::session::NewSession::new(owner.clone(), TestDuration::Thirty, "go").unwrap();
    let now = chrono::Utc::now();

    db.transaction(|tx| {
        let mut session = store::insert_session(tx, new, now)?;
        session.complete(&owner, "go".into(), 1.0, Default::default(), now)?;
        store::save_completion(tx, &session)?;

        let mut stats = store::get_or_create_user_stats(tx, UserId(21), now)?;
        assert!(records::evaluate(&stats, &session));
        let history = store::completed_scores(tx, UserId(21))?;
        records::apply(&mut stats, &session, &history);
        assert!(!records::evaluate(&stats, &session));
        Ok(())
    })
    .unwrap();
}

#[test]
fn stats_are_created_lazily_and_zeroed() {
    let engine = engine();
    let stats = engine.user_stats(UserId(99)).unwrap();
    assert_eq!(stats.total_tests, 0);
    assert_eq!(stats.completion_rate, 0.0);
    assert!(stats.best_wpm.is_empty());
    assert!(stats.last_test_at.is_none());
    assert_eq!(engine.user_stats(UserId(99)).unwrap(), stats);
}

#[test]
fn anti_cheat_signals_are_stored_in_order() {
    let engine = engine();
    let owner = guest("tab");
    let session = engine.start(owner.clone(), TestDuration::Sixty, "signals").unwrap();
    let events = vec![
        serde_json::json!({"type": "paste", "t": 1.2}),
        serde_json::json!({"type": "blur", "t": 3.4}),
    ];
    engine
        .complete(
            session.id,
            &owner,
            Submission {
                typed_text: "signals".into(),
                elapsed_secs: 4.0,
                focus_lost_count: 2,
                suspicious_events: events.clone(),
            },
        )
        .unwrap();

    let stored = engine.session(session.id, &owner).unwrap();
    assert_eq!(stored.anti_cheat.focus_lost_count, 2);
    assert_eq!(stored.anti_cheat.suspicious_events, events);
}

#[test]
fn file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typerank.db");
    let owner = Owner::User(UserId(5));

    let id = {
        let engine = Engine::new(Database::open(&path).unwrap());
        let session = engine.start(owner.clone(), TestDuration::Thirty, "persist me").unwrap();
        engine.complete(session.id, &owner, submit("persist me", 5.0)).unwrap();
        session.id
    };

    let engine = Engine::new(Database::open(&path).unwrap());
    let stored = engine.session(id, &owner).unwrap();
    assert_eq!(stored.state, SessionState::Completed);
    assert_eq!(stored.metrics.accuracy, 100.0);
    assert_eq!(engine.user_stats(UserId(5)).unwrap().completed_tests, 1);
}
