//! Wire format of the real-time channel.
//!
//! Every frame is a JSON object `{"event": <name>, "data": {...}}`. Field names
//! inside `data` are camelCase, the way the browser client emits them.

use base64::engine::general_purpose::STANDARD as b64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::models::ProctorOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRef {
    pub exam_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub exam_id: Option<String>,
    pub student_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExam {
    pub exam_id: Option<String>,
    #[serde(default)]
    pub options: ProctorOptions,
}

/// Base64 PNG captured by the student page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    pub student_id: String,
    pub screenshot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Base64 audio/webm snippet recorded by the student page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    pub student_id: String,
    pub audio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Messages a browser sends to the relay
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinTeacher(ExamRef),
    SetExam(ExamRef),
    JoinStudent(StudentRef),
    StartExam(StartExam),
    EndExam(ExamRef),
    OptionsConfirmed(StudentRef),
    TabChanged(StudentRef),
    Heartbeat(StudentRef),
    Screenshot(Screenshot),
    AudioChunk(AudioChunk),
    StudentLeave(StudentRef),
}

impl ClientEvent {
    /// Exam id carried in the payload, if the client sent one
    pub fn exam_id(&self) -> Option<&str> {
        match self {
            ClientEvent::JoinTeacher(r) | ClientEvent::SetExam(r) | ClientEvent::EndExam(r) => {
                r.exam_id.as_deref()
            }
            ClientEvent::JoinStudent(r)
            | ClientEvent::OptionsConfirmed(r)
            | ClientEvent::TabChanged(r)
            | ClientEvent::Heartbeat(r)
            | ClientEvent::StudentLeave(r) => r.exam_id.as_deref(),
            ClientEvent::StartExam(s) => s.exam_id.as_deref(),
            ClientEvent::Screenshot(s) => s.exam_id.as_deref(),
            ClientEvent::AudioChunk(a) => a.exam_id.as_deref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinTeacher(_) => "join_teacher",
            ClientEvent::SetExam(_) => "set_exam",
            ClientEvent::JoinStudent(_) => "join_student",
            ClientEvent::StartExam(_) => "start_exam",
            ClientEvent::EndExam(_) => "end_exam",
            ClientEvent::OptionsConfirmed(_) => "options_confirmed",
            ClientEvent::TabChanged(_) => "tab_changed",
            ClientEvent::Heartbeat(_) => "heartbeat",
            ClientEvent::Screenshot(_) => "screenshot",
            ClientEvent::AudioChunk(_) => "audio_chunk",
            ClientEvent::StudentLeave(_) => "student_leave",
        }
    }
}

/// Messages the relay sends to browsers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Status {
        msg: String,
    },
    #[serde(rename_all = "camelCase")]
    StudentJoined {
        student_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ExamStarted {
        exam_id: String,
    },
    OptionsPush(ProctorOptions),
    ExamEnded {},
    #[serde(rename_all = "camelCase")]
    TabChange {
        student_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        student_id: String,
        timestamp: String,
    },
    Screenshot(Screenshot),
    AudioChunk(AudioChunk),
    #[serde(rename_all = "camelCase")]
    StudentLeave {
        student_id: String,
    },
    RecordingSaved {
        filename: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Status { .. } => "status",
            ServerEvent::StudentJoined { .. } => "student_joined",
            ServerEvent::ExamStarted { .. } => "exam_started",
            ServerEvent::OptionsPush(_) => "options_push",
            ServerEvent::ExamEnded {} => "exam_ended",
            ServerEvent::TabChange { .. } => "tab_change",
            ServerEvent::Heartbeat { .. } => "heartbeat",
            ServerEvent::Screenshot(_) => "screenshot",
            ServerEvent::AudioChunk(_) => "audio_chunk",
            ServerEvent::StudentLeave { .. } => "student_leave",
            ServerEvent::RecordingSaved { .. } => "recording_saved",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Serialize to the JSON text frame sent over the socket
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reject media payloads that are not valid standard base64
pub fn validate_base64(payload: &str) -> Result<(), String> {
    if payload.is_empty() {
        return Err("payload is empty".to_string());
    }
    b64.decode(payload)
        .map(|_| ())
        .map_err(|e| format!("payload is not valid base64: {}", e))
}
