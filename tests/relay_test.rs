//! # Real-time Relay Tests
//!
//! Drive the per-connection event handler directly with session contexts and
//! observe what lands in each exam room.
//!
//! ```bash
//! cargo test --test relay_test
//! ```

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use proctor_relay::config::{RelayConfig, TeacherConfig};
use proctor_relay::db;
use proctor_relay::events::{ClientEvent, ServerEvent};
use proctor_relay::models::ProctorOptions;
use proctor_relay::serve::{build_state, AppState};
use proctor_relay::session::{close_session, handle_client_event, handle_text, Role, SessionContext};

async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig {
        port: 0,
        data_dir: dir.path().to_path_buf(),
        chunk_size: 1024,
        max_recording_bytes: 1 << 20,
        room_capacity: 64,
        session_ttl_hours: 1,
        teacher: TeacherConfig {
            username: "teacher".to_string(),
            password: Some("secret".to_string()),
            credential_profile: None,
        },
        object_store: None,
    };
    let state = build_state(config).await.unwrap();
    for exam_id in ["examA", "examB"] {
        db::insert_exam(&state.pool, exam_id, "2024-01-01T00:00:00+00:00")
            .await
            .unwrap();
    }
    (state, dir)
}

fn event(value: Value) -> ClientEvent {
    serde_json::from_value(value).unwrap()
}

fn error_code(replies: &[ServerEvent]) -> Option<String> {
    match replies {
        [ServerEvent::Error { code, .. }] => Some(code.clone()),
        _ => None,
    }
}

/// Everything currently buffered for a connection
fn drain(ctx: &mut SessionContext) -> Vec<Value> {
    let mut frames = Vec::new();
    if let Some(rx) = ctx.receiver.as_mut() {
        loop {
            match rx.try_recv() {
                Ok(frame) => frames.push(serde_json::from_str(&frame).unwrap()),
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            }
        }
    }
    frames
}

fn names(frames: &[Value]) -> Vec<&str> {
    frames.iter().filter_map(|f| f["event"].as_str()).collect()
}

async fn joined_teacher(state: &AppState, exam_id: &str) -> SessionContext {
    let mut ctx = SessionContext::new(Some(state.sessions.create()));
    let replies = handle_client_event(
        state,
        &mut ctx,
        event(json!({"event": "join_teacher", "data": {"examId": exam_id}})),
    )
    .await;
    assert_eq!(
        replies,
        vec![ServerEvent::Status {
            msg: "Joined".to_string()
        }]
    );
    ctx
}

async fn joined_student(state: &AppState, exam_id: &str, student_id: &str) -> (SessionContext, Vec<ServerEvent>) {
    let mut ctx = SessionContext::new(None);
    let replies = handle_client_event(
        state,
        &mut ctx,
        event(json!({"event": "join_student", "data": {"examId": exam_id, "studentId": student_id}})),
    )
    .await;
    (ctx, replies)
}

#[tokio::test]
async fn test_teacher_events_require_teacher_session() {
    let (state, _dir) = test_state().await;
    let mut ctx = SessionContext::new(None);

    for raw in [
        json!({"event": "join_teacher", "data": {"examId": "examA"}}),
        json!({"event": "set_exam", "data": {"examId": "examA"}}),
        json!({"event": "start_exam", "data": {"examId": "examA", "options": {"camera": true}}}),
        json!({"event": "end_exam", "data": {"examId": "examA"}}),
    ] {
        let replies = handle_client_event(&state, &mut ctx, event(raw)).await;
        assert_eq!(error_code(&replies).as_deref(), Some("unauthorized"));
    }
    assert!(ctx.receiver.is_none());

    let exam = db::get_exam(&state.pool, "examA").await.unwrap().unwrap();
    assert!(!exam.active);
}

#[tokio::test]
async fn test_join_unknown_exam() {
    let (state, _dir) = test_state().await;

    let mut teacher = SessionContext::new(Some(state.sessions.create()));
    let replies = handle_client_event(
        &state,
        &mut teacher,
        event(json!({"event": "join_teacher", "data": {"examId": "nope"}})),
    )
    .await;
    assert_eq!(error_code(&replies).as_deref(), Some("exam_not_found"));

    let (student, replies) = joined_student(&state, "nope", "stud1").await;
    assert_eq!(error_code(&replies).as_deref(), Some("exam_not_found"));
    assert!(student.exam_id.is_none());
    assert_eq!(state.rooms.room_count(), 0);
}

#[tokio::test]
async fn test_student_join_is_announced_and_recorded() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;

    let (student, replies) = joined_student(&state, "examA", "stud1").await;
    // exam not started yet: no options are invented
    assert!(replies.is_empty());
    assert_eq!(student.role, Role::Student("stud1".to_string()));

    let frames = drain(&mut teacher);
    assert_eq!(names(&frames), vec!["student_joined"]);
    assert_eq!(frames[0]["data"]["studentId"], "stud1");

    let students = db::list_students(&state.pool, "examA").await.unwrap();
    assert_eq!(students.len(), 1);
}

#[tokio::test]
async fn test_start_exam_pushes_options_and_late_joiners_get_them() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let (mut early, _) = joined_student(&state, "examA", "early").await;
    drain(&mut teacher);
    drain(&mut early);

    let replies = handle_client_event(
        &state,
        &mut teacher,
        event(json!({"event": "start_exam", "data": {"examId": "examA", "options": {"camera": true, "tabDetect": true}}})),
    )
    .await;
    assert!(replies.is_empty());

    let frames = drain(&mut early);
    assert_eq!(names(&frames), vec!["exam_started", "options_push"]);
    assert_eq!(frames[0]["data"]["examId"], "examA");
    assert_eq!(frames[1]["data"]["camera"], true);
    assert_eq!(frames[1]["data"]["tabDetect"], true);
    assert_eq!(frames[1]["data"]["mic"], false);

    let (_late, replies) = joined_student(&state, "examA", "late").await;
    assert_eq!(
        replies,
        vec![ServerEvent::OptionsPush(ProctorOptions {
            camera: true,
            tab_detect: true,
            ..Default::default()
        })]
    );
    // the push on join goes to the joiner only
    assert_eq!(names(&drain(&mut early)), vec!["student_joined"]);
}

#[tokio::test]
async fn test_end_exam_publishes_exactly_one_exam_ended() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let (mut s1, _) = joined_student(&state, "examA", "s1").await;
    let (mut s2, _) = joined_student(&state, "examA", "s2").await;
    drain(&mut teacher);
    drain(&mut s1);
    drain(&mut s2);

    let replies = handle_client_event(
        &state,
        &mut teacher,
        event(json!({"event": "end_exam", "data": {"examId": "examA"}})),
    )
    .await;
    assert!(replies.is_empty());

    for ctx in [&mut teacher, &mut s1, &mut s2] {
        let frames = drain(ctx);
        assert_eq!(names(&frames), vec!["exam_ended"]);
        assert_eq!(frames[0]["data"], json!({}));
    }
    let exam = db::get_exam(&state.pool, "examA").await.unwrap().unwrap();
    assert!(!exam.active);
}

#[tokio::test]
async fn test_events_stay_in_their_room() {
    let (state, _dir) = test_state().await;
    let mut teacher_a = joined_teacher(&state, "examA").await;
    let mut teacher_b = joined_teacher(&state, "examB").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;
    drain(&mut teacher_a);
    drain(&mut student);

    for raw in [
        json!({"event": "tab_changed", "data": {"examId": "examA", "studentId": "s1"}}),
        json!({"event": "heartbeat", "data": {"studentId": "s1"}}),
        json!({"event": "options_confirmed", "data": {"examId": "examA", "studentId": "s1"}}),
    ] {
        assert!(handle_client_event(&state, &mut student, event(raw)).await.is_empty());
    }

    let frames = drain(&mut teacher_a);
    assert_eq!(names(&frames), vec!["tab_change", "heartbeat", "status"]);
    assert_eq!(frames[0]["data"]["studentId"], "s1");
    assert!(frames[1]["data"]["timestamp"].is_string());
    assert_eq!(frames[2]["data"]["msg"], "Student s1 confirmed");

    assert!(drain(&mut teacher_b).is_empty());
}

#[tokio::test]
async fn test_mismatched_and_unjoined_events_are_rejected() {
    let (state, _dir) = test_state().await;
    let mut teacher_b = joined_teacher(&state, "examB").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;

    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "tab_changed", "data": {"examId": "examB", "studentId": "s1"}})),
    )
    .await;
    assert_eq!(error_code(&replies).as_deref(), Some("exam_mismatch"));
    assert!(drain(&mut teacher_b).is_empty());

    let mut stranger = SessionContext::new(None);
    let replies = handle_client_event(
        &state,
        &mut stranger,
        event(json!({"event": "heartbeat", "data": {"examId": "examB", "studentId": "x"}})),
    )
    .await;
    assert_eq!(error_code(&replies).as_deref(), Some("not_joined"));
    assert!(drain(&mut teacher_b).is_empty());
}

#[tokio::test]
async fn test_media_is_validated_and_relayed() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;
    drain(&mut teacher);

    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "screenshot", "data": {"studentId": "s1", "screenshot": "%%%", "timestamp": "t"}})),
    )
    .await;
    assert_eq!(error_code(&replies).as_deref(), Some("bad_request"));
    assert!(drain(&mut teacher).is_empty());

    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "screenshot", "data": {"examId": "examA", "studentId": "s1", "screenshot": "aGVsbG8=", "timestamp": "2024-01-01T00:00:00Z"}})),
    )
    .await;
    assert!(replies.is_empty());
    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "audio_chunk", "data": {"studentId": "s1", "audio": "AAEC"}})),
    )
    .await;
    assert!(replies.is_empty());

    let frames = drain(&mut teacher);
    assert_eq!(names(&frames), vec!["screenshot", "audio_chunk"]);
    assert_eq!(frames[0]["data"]["screenshot"], "aGVsbG8=");
    assert_eq!(frames[0]["data"]["timestamp"], "2024-01-01T00:00:00Z");
    assert_eq!(frames[1]["data"]["audio"], "AAEC");
    assert_eq!(frames[1]["data"]["examId"], "examA");
}

#[tokio::test]
async fn test_student_leave_removes_and_unsubscribes() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;
    drain(&mut teacher);
    assert_eq!(state.rooms.subscriber_count("examA"), 2);

    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "student_leave", "data": {"examId": "examA", "studentId": "s1"}})),
    )
    .await;
    assert!(replies.is_empty());

    assert!(student.receiver.is_none());
    assert!(student.exam_id.is_none());
    assert_eq!(state.rooms.subscriber_count("examA"), 1);
    assert!(db::list_students(&state.pool, "examA").await.unwrap().is_empty());

    let frames = drain(&mut teacher);
    assert_eq!(names(&frames), vec!["student_leave"]);
    assert_eq!(frames[0]["data"]["studentId"], "s1");

    // closing afterwards does not announce the student again
    close_session(&state, &mut student).await;
    assert!(drain(&mut teacher).is_empty());
}

#[tokio::test]
async fn test_disconnect_without_leave_is_an_implicit_leave() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;
    drain(&mut teacher);

    close_session(&state, &mut student).await;

    assert_eq!(names(&drain(&mut teacher)), vec!["student_leave"]);
    assert!(db::list_students(&state.pool, "examA").await.unwrap().is_empty());

    close_session(&state, &mut teacher).await;
    assert_eq!(state.rooms.room_count(), 0);
}

#[tokio::test]
async fn test_set_exam_switches_rooms() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;

    let replies = handle_client_event(
        &state,
        &mut teacher,
        event(json!({"event": "set_exam", "data": {"examId": "examB"}})),
    )
    .await;
    assert_eq!(error_code(&replies), None);
    assert_eq!(teacher.exam_id.as_deref(), Some("examB"));
    assert_eq!(state.rooms.subscriber_count("examA"), 0);

    let (_student, _) = joined_student(&state, "examB", "s1").await;
    assert_eq!(names(&drain(&mut teacher)), vec!["student_joined"]);
}

#[tokio::test]
async fn test_unparseable_message() {
    let (state, _dir) = test_state().await;
    let mut ctx = SessionContext::new(None);

    for raw in ["not json", r#"{"event":"launch_missiles","data":{}}"#, r#"{"event":"heartbeat"}"#] {
        let replies = handle_text(&state, &mut ctx, raw).await;
        assert_eq!(error_code(&replies).as_deref(), Some("invalid_message"), "{}", raw);
    }
}

#[tokio::test]
async fn test_logout_revokes_teacher_rights_on_open_connection() {
    let (state, _dir) = test_state().await;
    let mut teacher = joined_teacher(&state, "examA").await;
    let token = teacher.teacher_token.clone().unwrap();

    assert!(state.sessions.revoke(&token));

    let replies = handle_client_event(
        &state,
        &mut teacher,
        event(json!({"event": "start_exam", "data": {"examId": "examA", "options": {"camera": true}}})),
    )
    .await;
    assert_eq!(error_code(&replies).as_deref(), Some("unauthorized"));
    assert!(drain(&mut teacher).is_empty());
    let exam = db::get_exam(&state.pool, "examA").await.unwrap().unwrap();
    assert!(!exam.active);
}

#[tokio::test]
async fn test_student_rejoining_elsewhere_leaves_previous_exam() {
    let (state, _dir) = test_state().await;
    let mut teacher_a = joined_teacher(&state, "examA").await;
    let mut teacher_b = joined_teacher(&state, "examB").await;
    let (mut student, _) = joined_student(&state, "examA", "s1").await;
    drain(&mut teacher_a);

    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "join_student", "data": {"examId": "examB", "studentId": "s1"}})),
    )
    .await;
    assert!(replies.is_empty());
    assert_eq!(student.exam_id.as_deref(), Some("examB"));

    let frames = drain(&mut teacher_a);
    assert_eq!(names(&frames), vec!["student_leave"]);
    assert_eq!(frames[0]["data"]["studentId"], "s1");
    assert!(db::list_students(&state.pool, "examA").await.unwrap().is_empty());

    assert_eq!(names(&drain(&mut teacher_b)), vec!["student_joined"]);
    let in_b = db::list_students(&state.pool, "examB").await.unwrap();
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].id, "s1");

    // a new id within the same exam retires the old one too
    let replies = handle_client_event(
        &state,
        &mut student,
        event(json!({"event": "join_student", "data": {"examId": "examB", "studentId": "s2"}})),
    )
    .await;
    assert!(replies.is_empty());
    assert_eq!(names(&drain(&mut teacher_b)), vec!["student_leave", "student_joined"]);
    let in_b = db::list_students(&state.pool, "examB").await.unwrap();
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].id, "s2");
}
