//! Real-time relay over WebSocket.
//!
//! Each connection carries its own [`SessionContext`] (role, joined exam, room
//! receiver). Client events are dispatched by [`handle_client_event`], which
//! returns the replies meant for the sender only; anything for the whole exam
//! goes through the room registry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::auth;
use crate::db;
use crate::error::ApiError;
use crate::events::{validate_base64, ClientEvent, ServerEvent};
use crate::exam;
use crate::rooms::Frame;
use crate::serve::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Observer,
    Teacher,
    Student(String),
}

/// State of one WebSocket connection
pub struct SessionContext {
    /// Teacher session token presented at upgrade; rechecked on every
    /// teacher-only event so a logout takes effect on open sockets
    pub teacher_token: Option<String>,
    pub exam_id: Option<String>,
    pub role: Role,
    pub receiver: Option<broadcast::Receiver<Frame>>,
}

impl SessionContext {
    pub fn new(teacher_token: Option<String>) -> Self {
        Self {
            teacher_token,
            exam_id: None,
            role: Role::Observer,
            receiver: None,
        }
    }

    pub fn is_teacher(&self, state: &AppState) -> bool {
        self.teacher_token
            .as_deref()
            .is_some_and(|token| state.sessions.is_valid(token))
    }

    /// Move this connection into an exam's room, leaving the previous one
    fn join(&mut self, state: &AppState, exam_id: &str) {
        if self.exam_id.as_deref() == Some(exam_id) && self.receiver.is_some() {
            return;
        }
        self.leave(state);
        self.receiver = Some(state.rooms.subscribe(exam_id));
        self.exam_id = Some(exam_id.to_string());
    }

    fn leave(&mut self, state: &AppState) {
        self.receiver = None;
        if let Some(previous) = self.exam_id.take() {
            state.rooms.prune(&previous);
        }
        self.role = Role::Observer;
    }

    /// Resolve the exam an event applies to.
    /// A claimed id must match the joined exam; `allow_unjoined` lets teacher
    /// control events name an exam without joining it first.
    fn target_exam(&self, claimed: Option<&str>, allow_unjoined: bool) -> Result<String, ServerEvent> {
        match (self.exam_id.as_deref(), claimed) {
            (Some(joined), Some(claimed)) if joined != claimed => Err(ServerEvent::error(
                "exam_mismatch",
                format!("Connection is joined to exam '{}', not '{}'", joined, claimed),
            )),
            (Some(joined), _) => Ok(joined.to_string()),
            (None, Some(claimed)) if allow_unjoined => Ok(claimed.to_string()),
            (None, _) => Err(ServerEvent::error("not_joined", "Join an exam first")),
        }
    }
}

fn api_error_event(err: ApiError) -> ServerEvent {
    ServerEvent::error(err.code(), err.to_string())
}

fn required_exam_id(claimed: Option<&str>) -> Result<&str, ServerEvent> {
    claimed
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServerEvent::error("bad_request", "examId is required"))
}

/// Apply one client event and return the replies for the sender
pub async fn handle_client_event(
    state: &AppState,
    ctx: &mut SessionContext,
    event: ClientEvent,
) -> Vec<ServerEvent> {
    match dispatch(state, ctx, event).await {
        Ok(replies) => replies,
        Err(error) => vec![error],
    }
}

async fn dispatch(
    state: &AppState,
    ctx: &mut SessionContext,
    event: ClientEvent,
) -> Result<Vec<ServerEvent>, ServerEvent> {
    let teacher_only = matches!(
        event,
        ClientEvent::JoinTeacher(_)
            | ClientEvent::SetExam(_)
            | ClientEvent::StartExam(_)
            | ClientEvent::EndExam(_)
    );
    if teacher_only && !ctx.is_teacher(state) {
        warn!("Rejected {} from a non-teacher connection", event.name());
        return Err(api_error_event(ApiError::Unauthorized));
    }
    let claimed = event.exam_id().map(str::to_string);
    let claimed = claimed.as_deref();

    match event {
        ClientEvent::JoinTeacher(_) | ClientEvent::SetExam(_) => {
            let exam_id = required_exam_id(claimed)?;
            exam::require_exam(state, exam_id)
                .await
                .map_err(api_error_event)?;
            ctx.join(state, exam_id);
            ctx.role = Role::Teacher;
            info!("Teacher joined exam {}", exam_id);
            Ok(vec![ServerEvent::Status {
                msg: "Joined".to_string(),
            }])
        }

        ClientEvent::JoinStudent(r) => {
            let exam_id = required_exam_id(claimed)?.to_string();
            let exam = exam::require_exam(state, &exam_id)
                .await
                .map_err(api_error_event)?;

            // rejoining under another exam or id retires the previous student
            if let (Role::Student(previous), Some(previous_exam)) = (&ctx.role, &ctx.exam_id) {
                if *previous != r.student_id || *previous_exam != exam_id {
                    remove_student(state, previous_exam, previous).await;
                }
            }
            db::upsert_student(&state.pool, &r.student_id, &exam_id, &Utc::now().to_rfc3339())
                .await
                .map_err(|e| api_error_event(e.into()))?;
            ctx.join(state, &exam_id);
            ctx.role = Role::Student(r.student_id.clone());
            info!("Student {} joined exam {}", r.student_id, exam_id);

            state.rooms.publish(
                &exam_id,
                &ServerEvent::StudentJoined {
                    student_id: r.student_id,
                },
            );
            Ok(exam::options_for_join(&exam)
                .map(ServerEvent::OptionsPush)
                .into_iter()
                .collect())
        }

        ClientEvent::StartExam(start) => {
            let exam_id = ctx.target_exam(claimed, true)?;
            exam::start_exam(state, &exam_id, start.options)
                .await
                .map_err(api_error_event)?;
            Ok(Vec::new())
        }

        ClientEvent::EndExam(r) => {
            let exam_id = ctx.target_exam(claimed, true)?;
            exam::end_exam(state, &exam_id)
                .await
                .map_err(api_error_event)?;
            Ok(Vec::new())
        }

        ClientEvent::OptionsConfirmed(r) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            state.rooms.publish(
                &exam_id,
                &ServerEvent::Status {
                    msg: format!("Student {} confirmed", r.student_id),
                },
            );
            Ok(Vec::new())
        }

        ClientEvent::TabChanged(r) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            debug!("Student {} left the exam tab in {}", r.student_id, exam_id);
            state.rooms.publish(
                &exam_id,
                &ServerEvent::TabChange {
                    student_id: r.student_id,
                },
            );
            Ok(Vec::new())
        }

        ClientEvent::Heartbeat(r) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            state.rooms.publish(
                &exam_id,
                &ServerEvent::Heartbeat {
                    student_id: r.student_id,
                    timestamp: Utc::now().to_rfc3339(),
                },
            );
            Ok(Vec::new())
        }

        ClientEvent::Screenshot(mut shot) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            validate_base64(&shot.screenshot)
                .map_err(|e| ServerEvent::error("bad_request", format!("screenshot {}", e)))?;
            shot.exam_id = Some(exam_id.clone());
            state.rooms.publish(&exam_id, &ServerEvent::Screenshot(shot));
            Ok(Vec::new())
        }

        ClientEvent::AudioChunk(mut chunk) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            validate_base64(&chunk.audio)
                .map_err(|e| ServerEvent::error("bad_request", format!("audio {}", e)))?;
            chunk.exam_id = Some(exam_id.clone());
            state.rooms.publish(&exam_id, &ServerEvent::AudioChunk(chunk));
            Ok(Vec::new())
        }

        ClientEvent::StudentLeave(r) => {
            let exam_id = ctx.target_exam(claimed, false)?;
            remove_student(state, &exam_id, &r.student_id).await;
            ctx.leave(state);
            Ok(Vec::new())
        }
    }
}

async fn remove_student(state: &AppState, exam_id: &str, student_id: &str) {
    match db::delete_student(&state.pool, student_id, exam_id).await {
        Ok(_) => info!("Student {} left exam {}", student_id, exam_id),
        Err(e) => warn!("Failed to remove student {} from {}: {}", student_id, exam_id, e),
    }
    state.rooms.publish(
        exam_id,
        &ServerEvent::StudentLeave {
            student_id: student_id.to_string(),
        },
    );
}

/// Parse a text frame and dispatch it
pub async fn handle_text(state: &AppState, ctx: &mut SessionContext, text: &str) -> Vec<ServerEvent> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => handle_client_event(state, ctx, event).await,
        Err(e) => vec![ServerEvent::error(
            "invalid_message",
            format!("Could not parse message: {}", e),
        )],
    }
}

/// Tear down a connection; a student that never sent `student_leave` leaves now
pub async fn close_session(state: &AppState, ctx: &mut SessionContext) {
    if let (Role::Student(student_id), Some(exam_id)) = (ctx.role.clone(), ctx.exam_id.clone()) {
        debug!("Connection of student {} closed without leaving", student_id);
        ctx.receiver = None;
        remove_student(state, &exam_id, &student_id).await;
    }
    ctx.leave(state);
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let teacher_token = auth::session_token(&headers).filter(|token| state.sessions.is_valid(token));
    ws.on_upgrade(move |socket| run_session(socket, state, teacher_token))
}

async fn next_room_frame(
    receiver: &mut Option<broadcast::Receiver<Frame>>,
) -> Result<Frame, broadcast::error::RecvError> {
    match receiver {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match event.to_frame() {
        Ok(frame) => socket.send(Message::Text(frame.into())).await,
        Err(e) => {
            warn!("Dropping unserializable {} event: {}", event.name(), e);
            Ok(())
        }
    }
}

async fn run_session(mut socket: WebSocket, state: Arc<AppState>, teacher_token: Option<String>) {
    let mut ctx = SessionContext::new(teacher_token);
    debug!("WebSocket connected (teacher: {})", ctx.teacher_token.is_some());

    'session: loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break 'session,
                    Some(Ok(_)) => continue 'session,
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break 'session;
                    }
                };
                for reply in handle_text(&state, &mut ctx, text.as_str()).await {
                    if send_event(&mut socket, &reply).await.is_err() {
                        break 'session;
                    }
                }
            }
            frame = next_room_frame(&mut ctx.receiver) => {
                match frame {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break 'session;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Connection in exam {:?} lagged, skipped {} events",
                            ctx.exam_id, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        ctx.receiver = None;
                    }
                }
            }
        }
    }

    close_session(&state, &mut ctx).await;
    debug!("WebSocket disconnected");
}
